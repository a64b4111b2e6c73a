use std::collections::HashSet;

use thiserror::Error;

use crate::Cursor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upstream returned cursor {0} more than once")]
pub struct RepeatedCursor(pub Cursor);

/// Remembers every cursor handed out during one session so a pagination loop
/// is caught instead of followed forever.
#[derive(Debug, Default)]
pub struct CursorGuard {
    seen: HashSet<Cursor>,
}

impl CursorGuard {
    pub fn starting_at(cursor: Option<&Cursor>) -> Self {
        let mut guard = Self::default();
        if let Some(cursor) = cursor {
            guard.seen.insert(cursor.clone());
        }
        guard
    }

    pub fn observe(&mut self, next: Option<&Cursor>) -> Result<(), RepeatedCursor> {
        match next {
            Some(cursor) if !self.seen.insert(cursor.clone()) => Err(RepeatedCursor(cursor.clone())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_cursor_is_rejected() {
        let mut guard = CursorGuard::starting_at(Some(&Cursor::new("a")));
        assert!(guard.observe(Some(&Cursor::new("b"))).is_ok());
        assert!(guard.observe(None).is_ok());
        assert_eq!(
            guard.observe(Some(&Cursor::new("a"))),
            Err(RepeatedCursor(Cursor::new("a")))
        );
        assert_eq!(
            guard.observe(Some(&Cursor::new("b"))),
            Err(RepeatedCursor(Cursor::new("b")))
        );
    }

    #[test]
    fn fresh_start_accepts_first_cursor() {
        let mut guard = CursorGuard::starting_at(None);
        assert!(guard.observe(Some(&Cursor::new("first"))).is_ok());
    }
}
