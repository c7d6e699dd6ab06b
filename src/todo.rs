use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single task in the list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
  pub id: String,
  pub title: String,
  pub completed: bool,
}

impl TodoItem {
  /// New, incomplete item with a fresh random (v4 UUID) id.
  pub fn create(title: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      title: title.into(),
      completed: false,
    }
  }

  /// Copy of this item marked completed. Completing twice changes nothing.
  pub fn complete(&self) -> Self {
    Self {
      completed: true,
      ..self.clone()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_create_is_incomplete() {
    let item = TodoItem::create("Buy milk");
    assert_eq!(item.title, "Buy milk");
    assert!(!item.completed);
    assert_eq!(item.id.len(), 36);
  }

  #[test]
  fn test_ids_are_unique() {
    let ids: HashSet<String> = (0..10_000).map(|_| TodoItem::create("t").id).collect();
    assert_eq!(ids.len(), 10_000);
  }

  #[test]
  fn test_complete_leaves_input_untouched() {
    let item = TodoItem::create("Walk dog");
    let done = item.complete();

    assert!(!item.completed);
    assert!(done.completed);
    assert_eq!(done.id, item.id);
    assert_eq!(done.title, item.title);
  }

  #[test]
  fn test_complete_is_idempotent() {
    let item = TodoItem::create("Call mom");
    assert_eq!(item.complete().complete(), item.complete());
  }
}
