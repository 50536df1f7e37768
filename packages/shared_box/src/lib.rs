#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Owning smart pointers with custom deleters, shared ownership through a type-erased control
//! block and objects that can mint new shared handles to themselves.
//!
//! This crate provides two handle types:
//!
//! * [`ExclusiveBox<T, D>`] is the sole owner of a heap resource and releases it through a
//!   [`Deleter`] when dropped. Ownership can be moved, released as a raw pointer or handed over
//!   to a [`SharedBox`], but never duplicated.
//! * [`SharedBox<T>`] shares ownership of a payload among any number of handles, on any number
//!   of threads. The payload is destroyed exactly once, when the last handle goes away.
//!
//! Every non-null `SharedBox` refers to a control block that counts the owners and knows how to
//! destroy the payload without knowing its type. Because of that, handles of different types can
//! keep the same payload alive: a `SharedBox<Config>` and a `SharedBox<dyn Display>` viewing one
//! of its fields can share one control block.
//!
//! # Key features
//!
//! - **Custom deleters**: release resources that did not come from `Box` (pool slots, FFI
//!   handles, ...) through any [`Deleter`], including plain closures.
//! - **Slices**: `ExclusiveBox<[T]>` and `SharedBox<[T]>` drop every element.
//! - **Single-allocation shared values**: [`SharedBox::new()`] places the value next to its
//!   control block.
//! - **Casting**: convert a handle into one for a trait object or a field of the payload, keeping
//!   the same owners. The [`define_box_dyn_cast!`] macro generates safe trait object conversions.
//! - **Self-referencing objects**: types implementing [`SelfReferencing`] can obtain a new
//!   `SharedBox` to themselves from `&self`.
//!
//! # Examples
//!
//! Exclusive ownership with a custom deleter:
//!
//! ```
//! use std::ptr::NonNull;
//!
//! use shared_box::ExclusiveBox;
//!
//! let ptr = NonNull::from(Box::leak(Box::new(7_u32)));
//!
//! // SAFETY: The pointer came from a leaked box, which the deleter frees.
//! let exclusive = unsafe {
//!     ExclusiveBox::from_raw_with_deleter(ptr, |ptr: NonNull<u32>| {
//!         // SAFETY: The box passes back the pointer it owns, which came from a leaked box.
//!         drop(unsafe { Box::from_raw(ptr.as_ptr()) });
//!     })
//! };
//!
//! assert_eq!(*exclusive, 7);
//! ```
//!
//! Shared ownership across threads:
//!
//! ```
//! use std::thread;
//!
//! use shared_box::SharedBox;
//!
//! let numbers: SharedBox<[i32]> = SharedBox::from(vec![1, 2, 3].into_boxed_slice());
//!
//! let worker = {
//!     let numbers = numbers.clone();
//!     thread::spawn(move || numbers.iter().sum::<i32>())
//! };
//!
//! assert_eq!(worker.join().unwrap(), 6);
//! assert_eq!(numbers.strong_count(), 1);
//! ```
//!
//! Moving an exclusive box into shared ownership keeps its deleter:
//!
//! ```
//! use shared_box::{ExclusiveBox, SharedBox};
//!
//! let exclusive = ExclusiveBox::from_vec(vec!["a".to_string(), "b".to_string()]);
//! let shared: SharedBox<[String]> = exclusive.into();
//!
//! assert_eq!(shared.len(), 2);
//! ```
//!
//! # Null handles
//!
//! Both handle types may be null. [`get()`][SharedBox::get] and friends return `None` for a null
//! handle, whereas dereferencing a null handle through `Deref` panics.

mod cast;
mod constants;
mod control_block;
mod deleter;
mod error;
mod exclusive_box;
mod self_referencing;
mod shared_box;

pub(crate) use constants::*;
pub(crate) use control_block::*;
pub use deleter::*;
pub use error::*;
pub use exclusive_box::ExclusiveBox;
pub use self_referencing::*;
pub use shared_box::SharedBox;

#[doc(hidden)]
pub mod __private;
