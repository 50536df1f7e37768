//! Tests for the trait object conversions generated by `define_box_dyn_cast!`.

use std::fmt::Display;

use shared_box::{ExclusiveBox, SharedBox, define_box_dyn_cast};
use static_assertions::{assert_impl_all, assert_not_impl_any};
use testing::{DropCounter, Tracked};

trait Shape: Send + Sync {
    fn area(&self) -> f64;
}

trait Describe {
    fn describe(&self) -> String;
}

define_box_dyn_cast!(Display);
define_box_dyn_cast!(pub(crate) Shape);
define_box_dyn_cast!(Describe);

struct Square {
    side: f64,
    _tracked: Tracked,
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

impl Describe for Square {
    fn describe(&self) -> String {
        format!("square with side {}", self.side)
    }
}

fn square(side: f64, counter: &DropCounter) -> Square {
    Square {
        side,
        _tracked: counter.tracked(),
    }
}

// A trait with `Send + Sync` supertraits keeps the handle thread-mobile.
assert_impl_all!(SharedBox<dyn Shape>: Send, Sync);
// A trait without them yields a handle that stays on the current thread.
assert_not_impl_any!(SharedBox<dyn Describe>: Send, Sync);
assert_not_impl_any!(SharedBox<dyn Display>: Send, Sync);

#[test]
fn shared_cast_preserves_sharing() {
    let counter = DropCounter::new();
    let concrete = SharedBox::new(square(3.0, &counter));

    let shape = concrete.clone().cast_shape();

    assert!(shape.same_owner(&concrete));
    assert_eq!(concrete.strong_count(), 2);
    assert!((shape.area() - 9.0).abs() < f64::EPSILON);

    drop(concrete);
    assert_eq!(counter.drops(), 0);
    assert!((shape.area() - 9.0).abs() < f64::EPSILON);

    drop(shape);
    assert_eq!(counter.drops(), 1);
}

#[test]
fn shared_cast_of_owning_block() {
    let counter = DropCounter::new();
    let concrete = SharedBox::from_box(Box::new(square(2.0, &counter)));

    let description = concrete.cast_describe();

    assert_eq!(description.describe(), "square with side 2");
    assert_eq!(description.strong_count(), 1);

    drop(description);
    assert_eq!(counter.drops(), 1);
}

#[test]
fn shared_cast_of_null_is_null() {
    let null = SharedBox::<u32>::null();

    assert!(null.cast_display().is_null());
}

#[test]
fn exclusive_cast_releases_through_trait_object() {
    let counter = DropCounter::new();
    let exclusive = ExclusiveBox::new(square(4.0, &counter));

    let mut shape: ExclusiveBox<dyn Shape> = exclusive.cast_shape();
    assert!((shape.area() - 16.0).abs() < f64::EPSILON);
    assert!(shape.as_mut().is_some());

    drop(shape);
    assert_eq!(counter.drops(), 1);
}

#[test]
fn exclusive_cast_then_share() {
    let exclusive = ExclusiveBox::new(42_u64);

    let display: SharedBox<dyn Display> = exclusive.cast_display().into();
    let copy = display.clone();

    assert_eq!(copy.to_string(), "42");
    assert_eq!(display.strong_count(), 2);
}

#[test]
fn casts_keep_target_address() {
    let concrete = SharedBox::new(7_i32);
    let address = concrete.ptr().map(|ptr| ptr.cast::<()>());

    let display = concrete.cast_display();

    assert_eq!(display.ptr().map(|ptr| ptr.cast::<()>()), address);
}
