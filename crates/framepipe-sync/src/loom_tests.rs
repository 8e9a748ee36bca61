#![cfg(all(test, feature = "loom"))]

use crate::semaphore::ShmSemaphore;
use crate::sync::{AtomicU32, Ordering, thread};
use loom::sync::Arc;

#[test]
fn concurrent_posts_are_all_counted() {
    loom::model(|| {
        let sem = Arc::new(ShmSemaphore::new(0));

        let t1 = thread::spawn({
            let sem = sem.clone();
            move || sem.post()
        });
        let t2 = thread::spawn({
            let sem = sem.clone();
            move || sem.post()
        });

        t1.join().unwrap();
        t2.join().unwrap();

        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    });
}

#[test]
fn single_permit_has_single_winner() {
    loom::model(|| {
        let sem = Arc::new(ShmSemaphore::new(1));
        let winners = Arc::new(AtomicU32::new(0));

        let contend = |sem: Arc<ShmSemaphore>, winners: Arc<AtomicU32>| {
            if sem.try_wait() {
                winners.fetch_add(1, Ordering::SeqCst);
            }
        };

        let t1 = thread::spawn({
            let sem = sem.clone();
            let winners = winners.clone();
            move || contend(sem, winners)
        });
        let t2 = thread::spawn({
            let sem = sem.clone();
            let winners = winners.clone();
            move || contend(sem, winners)
        });

        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(sem.permits(), 0);
    });
}

#[test]
fn post_then_consume_handoff() {
    loom::model(|| {
        let sem = Arc::new(ShmSemaphore::new(0));
        let data = Arc::new(AtomicU32::new(0));

        let producer = thread::spawn({
            let sem = sem.clone();
            let data = data.clone();
            move || {
                data.store(42, Ordering::Relaxed);
                sem.post();
            }
        });

        let consumer = thread::spawn({
            let sem = sem.clone();
            let data = data.clone();
            move || {
                while !sem.try_wait() {
                    thread::yield_now();
                }
                data.load(Ordering::Relaxed)
            }
        });

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), 42);
    });
}
