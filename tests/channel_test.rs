#[cfg(test)]
mod tests {
    use future_core::{channel, Error, Event, Executor, Future, FutureExt, Immediate, SerialQueue};
    use futures::executor::block_on;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        thread,
    };

    #[test]
    fn test_updates_pushed_before_registration_are_not_replayed() {
        let (producer, updates) = channel::new::<i32>(0);
        producer.push_all([1, 2, 3]);
        let (tx, rx) = mpsc::channel();
        updates.on_update(Arc::new(Immediate), move |v| tx.send(v).unwrap());
        producer.push_all([4, 5]);
        drop(producer);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_per_observer_order_from_many_threads() {
        let (producer, updates) = channel::new::<(usize, usize)>(0);
        let queue = Arc::new(SerialQueue::new("channel-test").expect("spawn worker"));
        let (tx, rx) = mpsc::channel();
        updates.make_handler(queue, move |event| tx.send(event).unwrap());
        let pushers: Vec<_> = (0..4)
            .map(|t| {
                let producer = producer.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        producer.push((t, i));
                    }
                })
            })
            .collect();
        for pusher in pushers {
            pusher.join().expect("The pusher thread has panicked");
        }
        producer.finish();

        let mut last = [None; 4];
        let mut count = 0;
        for event in rx.iter() {
            match event {
                Event::Update((t, i)) => {
                    assert!(last[t].map_or(true, |prev| prev < i));
                    last[t] = Some(i);
                    count += 1;
                }
                Event::Completion(value) => {
                    assert_eq!(value, Ok(()));
                    break;
                }
            }
        }
        assert_eq!(count, 400);
    }

    #[test]
    fn test_cancel_racing_pushes_stops_delivery() {
        for _ in 0..20 {
            let (producer, updates) = channel::new::<usize>(0);
            let queue = Arc::new(SerialQueue::new("cancel-race").expect("spawn worker"));
            let seen = Arc::new(AtomicUsize::new(0));
            let counter = seen.clone();
            let handler = updates
                .on_update(queue.clone(), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("pending channel hands out a token");
            let pusher = thread::spawn(move || {
                for i in 0..1000 {
                    producer.push(i);
                }
            });
            thread::yield_now();
            assert!(handler.cancel());
            let at_cancel = seen.load(Ordering::SeqCst);
            pusher.join().expect("The pusher thread has panicked");
            let (tx, rx) = mpsc::channel();
            queue.execute(Box::new(move || tx.send(()).unwrap()));
            rx.recv().unwrap();
            // only a delivery already running when cancel returned may finish
            assert!(seen.load(Ordering::SeqCst) <= at_cancel + 1);
        }
    }

    #[test]
    fn test_teardown_cancels_waiting_consumers() {
        let (producer, updates) = channel::new::<String>(1);
        let waiting = updates.wait();
        let task = thread::spawn(move || block_on(waiting));
        producer.push("hello".into());
        producer.cancel();
        assert_eq!(task.join().expect("The task thread has panicked"), Err(Error::Cancelled));
        assert_eq!(updates.completion(), Some(Err(Error::Cancelled)));
        assert!(!producer.push("late".into()));
    }
}
