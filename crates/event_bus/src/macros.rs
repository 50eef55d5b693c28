//! # Event Declaration Macros
//!
//! Declarative helpers implementing [`Event`](crate::Event) and
//! [`EventKind`](crate::EventKind) with the type's supertypes.
//!
//! ```rust
//! use event_bus::{event_marker, impl_event, Event, EventType};
//!
//! // Marker interface, usable as an accepted event type
//! pub trait Notification {}
//! event_marker!(dyn Notification);
//!
//! #[derive(Debug)]
//! pub struct Message { pub text: String }
//! impl_event!(Message);
//!
//! #[derive(Debug)]
//! pub struct Alert { pub text: String }
//! impl Notification for Alert {}
//! impl_event!(Alert => dyn Notification);
//!
//! let alert = Alert { text: "disk full".into() };
//! assert_eq!(alert.event_type(), EventType::of::<Alert>());
//! ```

/// Implements [`Event`](crate::Event) and [`EventKind`](crate::EventKind) for a
/// concrete type.
///
/// `impl_event!(T)` declares a root event type; `impl_event!(T => A, B)`
/// declares `A` and `B` as direct supertypes of `T`. Supertypes may be other
/// event types or markers declared with [`event_marker!`](crate::event_marker).
///
/// A concrete supertype can be given a projection, `A as |e| &e.field`, which
/// lets typed handlers for `A` view a `T`. Projections chain through the
/// supertype's own declaration.
///
/// ```rust
/// use event_bus::{impl_event, Event};
/// use std::any::TypeId;
///
/// #[derive(Debug)]
/// struct Hello { to: String }
/// impl_event!(Hello);
///
/// #[derive(Debug)]
/// struct LoudHello { base: Hello, volume: u8 }
/// impl_event!(LoudHello => Hello as |e| &e.base);
///
/// let loud = LoudHello { base: Hello { to: "you".into() }, volume: 11 };
/// let hello = loud
///     .project(TypeId::of::<Hello>())
///     .and_then(|any| any.downcast_ref::<Hello>());
/// assert_eq!(hello.map(|h| h.to.as_str()), Some("you"));
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty => $($parent:ty $(as |$e:ident| $proj:expr)?),* $(,)?) => {
        impl $crate::EventKind for $ty {
            fn supertypes() -> ::std::vec::Vec<$crate::EventType> {
                ::std::vec![$($crate::EventType::of::<$parent>()),*]
            }
        }

        impl $crate::Event for $ty {
            fn event_type(&self) -> $crate::EventType {
                $crate::EventType::of::<$ty>()
            }

            #[allow(unused_variables)]
            fn project(
                &self,
                target: ::std::any::TypeId,
            ) -> ::std::option::Option<&dyn ::std::any::Any> {
                $(
                    $crate::__event_projection!(self, target, $parent $(, |$e| $proj)?);
                )*
                ::std::option::Option::None
            }
        }
    };
    ($ty:ty) => {
        $crate::impl_event!($ty => );
    };
}

/// Projection step of [`impl_event!`]; returns from the enclosing `project`
/// when `target` is the parent or reachable through it.
#[doc(hidden)]
#[macro_export]
macro_rules! __event_projection {
    ($this:ident, $target:ident, $parent:ty) => {};
    ($this:ident, $target:ident, $parent:ty, |$e:ident| $proj:expr) => {{
        let $e = $this;
        let parent: &$parent = $proj;
        if $target == ::std::any::TypeId::of::<$parent>() {
            return ::std::option::Option::Some(parent as &dyn ::std::any::Any);
        }
        if let ::std::option::Option::Some(found) = $crate::Event::project(parent, $target) {
            return ::std::option::Option::Some(found);
        }
    }};
}

/// Declares a marker type (typically `dyn Trait`) that events can list as a
/// supertype and subscribers can accept.
///
/// Markers themselves are never posted; they only exist in hierarchies.
#[macro_export]
macro_rules! event_marker {
    ($ty:ty => $($parent:ty),* $(,)?) => {
        impl $crate::EventKind for $ty {
            fn supertypes() -> ::std::vec::Vec<$crate::EventType> {
                ::std::vec![$($crate::EventType::of::<$parent>()),*]
            }
        }
    };
    ($ty:ty) => {
        $crate::event_marker!($ty => );
    };
}
