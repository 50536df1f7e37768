//! Basic usage of `ExclusiveBox` and `SharedBox`.
//!
//! This shows exclusive ownership with a custom deleter, moving an exclusive box into shared
//! ownership, casting to a trait object and an object that hands out shared handles to itself.

use std::fmt::Display;
use std::ptr::NonNull;
use std::thread;

use shared_box::{ExclusiveBox, SelfRef, SelfReferencing, SharedBox, define_box_dyn_cast};

define_box_dyn_cast!(Display);

struct Connection {
    id: u32,
    self_ref: SelfRef,
}

// SAFETY: The `SelfRef` is a field of the connection itself.
unsafe impl SelfReferencing for Connection {
    fn self_ref(&self) -> &SelfRef {
        &self.self_ref
    }
}

impl Connection {
    fn spawn_keepalive(&self) -> thread::JoinHandle<u32> {
        // The background thread keeps the connection alive on its own.
        let this = self
            .shared_from_self()
            .expect("connections are always created as self-referencing shared boxes");

        thread::spawn(move || this.id)
    }
}

fn main() {
    println!("=== Shared Box Example ===");

    // Exclusive ownership with a deleter that reports what it releases.
    let raw = NonNull::from(Box::leak(Box::new(1024_u64)));

    // SAFETY: The pointer came from a leaked box and the deleter frees it as such.
    let exclusive = unsafe {
        ExclusiveBox::from_raw_with_deleter(raw, |ptr: NonNull<u64>| {
            // SAFETY: The box only calls the deleter with the pointer it owns.
            let value = unsafe { Box::from_raw(ptr.as_ptr()) };
            println!("Deleter released {value}");
        })
    };

    println!("Exclusive value: {}", *exclusive);

    // Ownership moves into a shared box, together with the deleter.
    let shared = SharedBox::from_exclusive(exclusive);
    let copy = shared.clone();
    println!("Shared value: {} (owners: {})", *copy, shared.strong_count());

    drop(shared);
    println!("After dropping one owner: {}", copy.strong_count());
    drop(copy);

    // A shared box can be viewed as a trait object without losing its owners.
    let number = SharedBox::new(7_i32);
    let text = number.clone().cast_display();
    println!("As Display: {} (same owner: {})", &*text, text.same_owner(&number));

    // An object that mints new owners of itself.
    let connection = SharedBox::new_self_referencing(Connection {
        id: 42,
        self_ref: SelfRef::new(),
    });

    let keepalive = connection.spawn_keepalive();
    println!("Keepalive saw connection {}", keepalive.join().unwrap());
    println!("Connection owners after keepalive: {}", connection.strong_count());

    println!("Example completed successfully!");
}
