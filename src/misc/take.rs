use std::ops::{Deref, DerefMut};

/// wrapper for a value that is moved out exactly once, at the end of its owners life
/// (e.g. a sender that must be dropped before waiting on its receiver)
pub struct Take<T>(Option<T>);

impl<T> Take<T> {
    pub fn new(val: T) -> Self {
        Self(Some(val))
    }

    /// # Panics
    /// if the value was already taken
    pub fn take(&mut self) -> T {
        self.0.take().expect("Take::take called twice")
    }

    pub fn is_taken(&self) -> bool {
        self.0.is_none()
    }
}

impl<T> Deref for Take<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref().expect("Take used after take()")
    }
}

impl<T> DerefMut for Take<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut().expect("Take used after take()")
    }
}

#[cfg(test)]
mod test {
    use super::Take;

    #[test]
    fn take_once() {
        let mut t = Take::new(String::from("sender"));
        assert_eq!(t.len(), 6);
        assert!(!t.is_taken());
        assert_eq!(t.take(), "sender");
        assert!(t.is_taken());
    }

    #[test]
    #[should_panic]
    fn take_twice_panics() {
        let mut t = Take::new(1u8);
        t.take();
        t.take();
    }
}
