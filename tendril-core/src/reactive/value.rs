//! Values that can live in a cell.
//!
//! A cell needs two things from its value type: a strict "is this the same
//! value" test for the write short-circuit, and (for composite types) a way
//! to deep-wrap the value so nested writes reach the cell.

use std::sync::Arc;

use crate::data::{self, Data, Effect};

/// A type that can be stored in a [`ValueRef`](super::ValueRef) or produced
/// by a [`ComputedRef`](super::ComputedRef).
pub trait CellValue: Clone + Send + Sync + 'static {
    /// Strict identity. Writing a value that is `same` as the stored one is
    /// a no-op and notifies nobody.
    fn same(&self, other: &Self) -> bool;

    /// Whether [`into_reactive`](CellValue::into_reactive) would wrap this
    /// value. Scalars never can.
    fn can_be_reactive(&self) -> bool {
        false
    }

    /// Deep-wrap so that nested writes run `effect`.
    fn into_reactive(self, _effect: Effect) -> Self {
        self
    }
}

macro_rules! scalar_cell_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CellValue for $ty {
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

scalar_cell_value!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

impl CellValue for Data {
    fn same(&self, other: &Self) -> bool {
        Data::same(self, other)
    }

    fn can_be_reactive(&self) -> bool {
        data::can_be_reactive(self)
    }

    fn into_reactive(self, effect: Effect) -> Self {
        data::reactive(self, effect)
    }
}

impl<T: CellValue> CellValue for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn can_be_reactive(&self) -> bool {
        self.as_ref().is_some_and(CellValue::can_be_reactive)
    }

    fn into_reactive(self, effect: Effect) -> Self {
        self.map(|value| value.into_reactive(effect))
    }
}

/// Shared values compare by pointer, like composites.
impl<T: ?Sized + Send + Sync + 'static> CellValue for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_use_equality() {
        assert!(5_i32.same(&5));
        assert!(!5_i32.same(&6));
        assert!(String::from("a").same(&String::from("a")));
        assert!(!f64::NAN.same(&f64::NAN));
        assert!(!7_u8.can_be_reactive());
    }

    #[test]
    fn options_defer_to_inner_value() {
        let node = Data::object();
        assert!(Some(node.clone()).same(&Some(node.clone())));
        assert!(!Some(node.clone()).same(&None));
        assert!(Some(node).can_be_reactive());
        assert!(!None::<Data>.can_be_reactive());
    }

    #[test]
    fn arcs_use_identity() {
        let a: Arc<str> = Arc::from("x");
        let b: Arc<str> = Arc::from("x");
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }
}
