//! Dense, type-erased component storage.
//!
//! A [`Column<T>`] is one component array of an archetype: a `Vec<T>` of
//! values plus a parallel `Vec` of change stamps. Archetypes hold columns as
//! `Box<dyn ComponentColumn>` so rows can be moved between archetypes without
//! knowing the concrete type; typed access downcasts back to `Column<T>`.

use std::any::Any;

use crate::change::ChangeStamp;
use crate::component::Component;

/// A component value moved out of (or into) a column without its type.
pub type BoxedComponent = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// ComponentColumn
// ---------------------------------------------------------------------------

/// Object-safe interface over a [`Column<T>`].
pub trait ComponentColumn: Send + Sync {
    /// Number of rows.
    fn len(&self) -> usize;

    /// Whether the column has no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the value at `row`, moving the last row into its place.
    fn swap_remove_row(&mut self, row: usize);

    /// Move the value at `row` out as a boxed value, swap-removing it.
    fn take_row(&mut self, row: usize) -> (BoxedComponent, ChangeStamp);

    /// Whether `value` has this column's element type.
    fn accepts(&self, value: &(dyn Any + Send + Sync)) -> bool;

    /// Append a boxed value. Returns the value back if its type does not
    /// match the column.
    fn push_boxed(
        &mut self,
        value: BoxedComponent,
        stamp: ChangeStamp,
    ) -> Result<usize, BoxedComponent>;

    /// Serialize the value at `row` to JSON.
    fn serialize_row(&self, row: usize) -> Result<serde_json::Value, String>;

    /// Change stamp of `row`.
    fn stamp(&self, row: usize) -> Option<ChangeStamp>;

    /// An empty column of the same element type.
    fn new_empty(&self) -> Box<dyn ComponentColumn>;

    /// Drop every row.
    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// Values of one component type, indexed by archetype row.
#[derive(Debug, Clone)]
pub struct Column<T> {
    values: Vec<T>,
    stamps: Vec<ChangeStamp>,
}

impl<T: Component> Column<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            stamps: Vec::new(),
        }
    }

    /// Append `value`, returning its row.
    pub fn push(&mut self, value: T, stamp: ChangeStamp) -> usize {
        self.values.push(value);
        self.stamps.push(stamp);
        self.values.len() - 1
    }

    /// Remove `row` by moving the last value into it. Returns the removed value.
    pub fn swap_remove(&mut self, row: usize) -> T {
        self.stamps.swap_remove(row);
        self.values.swap_remove(row)
    }

    pub fn get(&self, row: usize) -> Option<&T> {
        self.values.get(row)
    }

    /// Mutable access; the row is stamped with `stamp`.
    pub fn get_mut(&mut self, row: usize, stamp: ChangeStamp) -> Option<&mut T> {
        let value = self.values.get_mut(row)?;
        self.stamps[row] = stamp;
        Some(value)
    }

    /// Overwrite the value at `row`, returning the previous one.
    pub fn set(&mut self, row: usize, value: T, stamp: ChangeStamp) -> Option<T> {
        let slot = self.values.get_mut(row)?;
        self.stamps[row] = stamp;
        Some(std::mem::replace(slot, value))
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn stamps(&self) -> &[ChangeStamp] {
        &self.stamps
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentColumn for Column<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn swap_remove_row(&mut self, row: usize) {
        self.swap_remove(row);
    }

    fn take_row(&mut self, row: usize) -> (BoxedComponent, ChangeStamp) {
        let stamp = self.stamps.swap_remove(row);
        (Box::new(self.values.swap_remove(row)), stamp)
    }

    fn accepts(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.is::<T>()
    }

    fn push_boxed(
        &mut self,
        value: BoxedComponent,
        stamp: ChangeStamp,
    ) -> Result<usize, BoxedComponent> {
        let value = value.downcast::<T>()?;
        Ok(self.push(*value, stamp))
    }

    fn serialize_row(&self, row: usize) -> Result<serde_json::Value, String> {
        let value = self
            .values
            .get(row)
            .ok_or_else(|| format!("row {row} out of bounds (len {})", self.values.len()))?;
        serde_json::to_value(value).map_err(|e| e.to_string())
    }

    fn stamp(&self, row: usize) -> Option<ChangeStamp> {
        self.stamps.get(row).copied()
    }

    fn new_empty(&self) -> Box<dyn ComponentColumn> {
        Box::new(Column::<T>::new())
    }

    fn clear(&mut self) {
        self.values.clear();
        self.stamps.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);

    fn stamp(n: u64) -> ChangeStamp {
        ChangeStamp::from_raw(n)
    }

    #[test]
    fn swap_remove_moves_last_into_hole() {
        let mut col = Column::new();
        for i in 0..4 {
            col.push(Health(i), stamp(1));
        }
        assert_eq!(col.swap_remove(1), Health(1));
        assert_eq!(col.values(), &[Health(0), Health(3), Health(2)]);
        assert_eq!(col.len(), 3);
    }

    #[test]
    fn writes_update_stamps() {
        let mut col = Column::new();
        col.push(Health(1), stamp(1));
        col.push(Health(2), stamp(1));

        col.get_mut(0, stamp(5)).unwrap().0 += 1;
        assert_eq!(col.set(1, Health(9), stamp(6)), Some(Health(2)));
        assert_eq!(col.stamps(), &[stamp(5), stamp(6)]);
        assert_eq!(col.get(0), Some(&Health(2)));
        assert!(col.get_mut(7, stamp(8)).is_none());
    }

    #[test]
    fn erased_take_and_push_roundtrip_between_columns() {
        let mut src: Box<dyn ComponentColumn> = Box::new(Column::<Health>::new());
        let mut dst = src.new_empty();
        assert!(src.push_boxed(Box::new(Health(7)), stamp(3)).is_ok());
        assert!(src.push_boxed(Box::new(Health(8)), stamp(4)).is_ok());

        let (value, st) = src.take_row(0);
        assert_eq!(st, stamp(3));
        assert_eq!(dst.push_boxed(value, st).ok(), Some(0));
        assert_eq!(src.len(), 1);

        let typed = dst.as_any().downcast_ref::<Column<Health>>().unwrap();
        assert_eq!(typed.values(), &[Health(7)]);
    }

    #[test]
    fn push_boxed_rejects_wrong_type() {
        let mut col: Box<dyn ComponentColumn> = Box::new(Column::<Health>::new());
        assert!(!col.accepts(&"text"));
        assert!(col.push_boxed(Box::new(1.5f32), stamp(1)).is_err());
        assert!(col.is_empty());
    }

    #[test]
    fn serialize_row_produces_json() {
        let mut col = Column::new();
        col.push(Health(42), stamp(1));
        let erased: &dyn ComponentColumn = &col;
        assert_eq!(erased.serialize_row(0).unwrap(), serde_json::json!(42));
        assert!(erased.serialize_row(3).is_err());
    }
}
