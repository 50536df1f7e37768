/// Generates safe conversions of [`SharedBox<T>`][crate::SharedBox] and
/// [`ExclusiveBox<T>`][crate::ExclusiveBox] into boxes of `dyn Trait`.
///
/// Stable Rust cannot unsize a custom smart pointer implicitly, so the conversion is a method.
/// For a trait named `Foo`, the macro defines a trait `CastFoo` with a method `cast_foo()` and
/// implements it for both box types whenever the target implements `Foo`:
///
/// * `SharedBox<T>` becomes `SharedBox<dyn Foo>`, sharing the same control block.
/// * `ExclusiveBox<T>` (with the default deleter) becomes `ExclusiveBox<dyn Foo>`.
///
/// The generated trait has the visibility given before the trait name, if any. The trait being
/// cast to must be in scope by its plain name.
///
/// The resulting box is only `Send`/`Sync` if `dyn Foo` is, so a trait without `Send + Sync`
/// supertraits yields a box that stays on the current thread.
///
/// # Examples
///
/// ```
/// use std::fmt::Display;
///
/// use shared_box::{ExclusiveBox, SharedBox, define_box_dyn_cast};
///
/// define_box_dyn_cast!(Display);
///
/// let number = SharedBox::new(42_u32);
/// let text = number.clone().cast_display();
///
/// assert_eq!(text.to_string(), "42");
/// assert!(text.same_owner(&number));
///
/// let owned: ExclusiveBox<dyn Display> = ExclusiveBox::new("hello").cast_display();
/// assert_eq!(owned.to_string(), "hello");
/// ```
#[macro_export]
macro_rules! define_box_dyn_cast {
    ($vis:vis $trait_name:ident) => {
        $crate::__private::paste! {
            #[doc = "Converts boxes into boxes of `dyn " $trait_name "`."]
            $vis trait [<Cast $trait_name>] {
                #[doc = "The box type that holds a `dyn " $trait_name "`."]
                type Output;

                #[doc = "Converts the box into a box of `dyn " $trait_name "`."]
                fn [<cast_ $trait_name:snake>](self) -> Self::Output;
            }

            impl<T: $trait_name + 'static> [<Cast $trait_name>] for $crate::SharedBox<T> {
                type Output = $crate::SharedBox<dyn $trait_name>;

                fn [<cast_ $trait_name:snake>](self) -> Self::Output {
                    fn as_dyn<T: $trait_name + 'static>(
                        target: &T,
                    ) -> &(dyn $trait_name + 'static) {
                        target
                    }

                    // SAFETY: The unsizing coercion views the whole target, which is `'static`.
                    // A `dyn Trait` is only `Send`/`Sync` if the trait requires it of `T`.
                    unsafe { self.cast_unchecked(as_dyn::<T>) }
                }
            }

            impl<T: $trait_name + 'static> [<Cast $trait_name>] for $crate::ExclusiveBox<T> {
                type Output = $crate::ExclusiveBox<dyn $trait_name>;

                fn [<cast_ $trait_name:snake>](self) -> Self::Output {
                    fn as_dyn_mut<T: $trait_name + 'static>(
                        target: &mut T,
                    ) -> &mut (dyn $trait_name + 'static) {
                        target
                    }

                    // SAFETY: The unsizing coercion keeps the address of the boxed target, which
                    // the default deleter releases through the resulting fat pointer. A
                    // `dyn Trait` is only `Send`/`Sync` if the trait requires it of `T`.
                    unsafe { self.cast_unchecked(as_dyn_mut::<T>) }
                }
            }
        }
    };
}
