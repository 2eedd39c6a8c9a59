use std::fmt;

/// Values that occupy a number of JVM slots (`long` and `double` take two)
pub trait Width {
    fn width(&self) -> usize;
}

/// Operand stack of values with different widths
///
/// Entries are counted per value, while the height is counted in slots. The height is what
/// the JVM sees, and also how many local slots it takes to back the stack up.
#[derive(Clone)]
pub struct SlotStack<T> {
    values: Vec<T>,
    height: usize,
}

impl<T: Width> SlotStack<T> {
    pub fn new() -> SlotStack<T> {
        SlotStack {
            values: vec![],
            height: 0,
        }
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of slots
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn push(&mut self, value: T) {
        self.height += value.width();
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        let value = self.values.pop()?;
        self.height -= value.width();
        Some(value)
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.height = 0;
    }

    /// Value `depth` entries below the top (`0` is the top)
    pub fn get_from_top(&self, depth: usize) -> Option<&T> {
        let len = self.values.len();
        if depth < len {
            self.values.get(len - 1 - depth)
        } else {
            None
        }
    }

    /// Values from the bottom of the stack up
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

impl<T: PartialEq> PartialEq for SlotStack<T> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl<T: Width> Default for SlotStack<T> {
    fn default() -> Self {
        SlotStack::new()
    }
}

impl<T: Width> FromIterator<T> for SlotStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(values: I) -> Self {
        let mut stack = SlotStack::new();
        for value in values {
            stack.push(value);
        }
        stack
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.values).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Value {
        Int,
        Long,
    }

    impl Width for Value {
        fn width(&self) -> usize {
            match self {
                Value::Int => 1,
                Value::Long => 2,
            }
        }
    }

    #[test]
    fn wide_values_count_twice() {
        let stack: SlotStack<Value> = [Value::Int, Value::Long, Value::Int].into_iter().collect();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.height(), 4);
        assert_eq!(stack.get_from_top(1), Some(&Value::Long));
        assert_eq!(stack.get_from_top(3), None);
    }

    #[test]
    fn pop_lowers_the_height() {
        let mut stack = SlotStack::new();
        stack.push(Value::Long);
        stack.push(Value::Int);
        assert_eq!(stack.pop(), Some(Value::Int));
        assert_eq!(stack.height(), 2);
        assert_eq!(stack.pop(), Some(Value::Long));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
        assert_eq!(stack.height(), 0);
    }
}
