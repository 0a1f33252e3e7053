//! Concurrent resize (spec.md §8 scenario 3): 8 threads each `set` 1024
//! distinct keys into a single empty table, then each thread `get`s its own
//! keys back and verifies every value survived the resizes the table went
//! through along the way.
use std::sync::Arc;
use std::thread;

use kos_gc::proptable::{DynamicPropertyHost, PropTable};
use kos_gc::{InternalError, ObjectId};

struct NoDynamicProps;
impl DynamicPropertyHost for NoDynamicProps {
    fn is_dynamic_property(&self, _value: ObjectId) -> bool {
        false
    }
    fn invoke_setter(&self, _dynamic_prop: ObjectId, _new_value: ObjectId) -> Result<ObjectId, InternalError> {
        unreachable!("is_dynamic_property always returns false")
    }
}

const THREADS: isize = 8;
const KEYS_PER_THREAD: isize = 1024;

#[test]
fn eight_threads_set_and_get_their_own_keys_through_concurrent_resize() {
    let table = Arc::new(PropTable::new(4));

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = ObjectId::from_small_int(t * KEYS_PER_THREAD + i);
                    let value = ObjectId::from_small_int(t * 1_000_000 + i);
                    table.set(key, value, &NoDynamicProps).unwrap();
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let readers: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = ObjectId::from_small_int(t * KEYS_PER_THREAD + i);
                    let expected = ObjectId::from_small_int(t * 1_000_000 + i);
                    let got = table.get(key);
                    assert_eq!(got, Some(expected), "thread {t} key {i} lost or corrupted");
                }
            })
        })
        .collect();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(table.len() as isize, THREADS * KEYS_PER_THREAD);
}
