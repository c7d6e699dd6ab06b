//! Server-side assembly of the task list page.
//!
//! The cached shell document carries a single marker comment. The rendered
//! list replaces it; everything around the marker is kept as-is.

use crate::todo::TodoItem;

/// Placeholder in the shell where the list is injected
pub const MARKER: &str = "<!-- lazy -->";

/// Escape text for embedding in markup.
pub fn escape_text(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for c in raw.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      '/' => out.push_str("&#x2F;"),
      '`' => out.push_str("&#x60;"),
      '=' => out.push_str("&#x3D;"),
      _ => out.push(c),
    }
  }
  out
}

/// Render the list container with one entry per item.
///
/// Titles are expected to be escaped already (they are escaped on the way
/// in); ids are escaped here.
pub fn render_list(items: &[TodoItem]) -> String {
  let mut html = String::from(r#"<ul class="todo-list" data-hydrate="todo-list">"#);

  for item in items {
    let id = escape_text(&item.id);
    if item.completed {
      html.push_str(&format!(
        r#"<li class="todo completed" data-id="{id}"><s>{title}</s> <a href="/delete?id={id}">delete</a></li>"#,
        id = id,
        title = item.title,
      ));
    } else {
      html.push_str(&format!(
        r#"<li class="todo" data-id="{id}">{title} <a href="/complete?id={id}">complete</a> <a href="/delete?id={id}">delete</a></li>"#,
        id = id,
        title = item.title,
      ));
    }
  }

  html.push_str("</ul>");
  html
}

/// Replace the marker in `shell` with the rendered list.
///
/// The shell comes back unchanged when there are no items or no marker.
pub fn splice(shell: &str, items: &[TodoItem]) -> String {
  if items.is_empty() {
    return shell.to_string();
  }

  match shell.split_once(MARKER) {
    Some((before, after)) => {
      let list = render_list(items);
      let mut out = String::with_capacity(before.len() + list.len() + after.len());
      out.push_str(before);
      out.push_str(&list);
      out.push_str(after);
      out
    }
    None => shell.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(id: &str, title: &str, completed: bool) -> TodoItem {
    TodoItem {
      id: id.to_string(),
      title: title.to_string(),
      completed,
    }
  }

  #[test]
  fn test_escape_every_special_character() {
    assert_eq!(
      escape_text(r#"&<>"'/`="#),
      "&amp;&lt;&gt;&quot;&#39;&#x2F;&#x60;&#x3D;"
    );
  }

  #[test]
  fn test_escape_plain_text_unchanged() {
    assert_eq!(escape_text("Buy milk, eggs (12)!"), "Buy milk, eggs (12)!");
    assert_eq!(escape_text(""), "");
  }

  #[test]
  fn test_escape_is_injective_on_special_set() {
    let specials = ['&', '<', '>', '"', '\'', '/', '`', '='];
    let escaped: std::collections::HashSet<String> =
      specials.iter().map(|c| escape_text(&c.to_string())).collect();
    assert_eq!(escaped.len(), specials.len());
  }

  #[test]
  fn test_escape_script_tag() {
    assert_eq!(
      escape_text("<script>alert(1)</script>"),
      "&lt;script&gt;alert(1)&lt;&#x2F;script&gt;"
    );
  }

  #[test]
  fn test_render_incomplete_has_both_actions() {
    let html = render_list(&[item("a1", "Buy milk", false)]);
    assert!(html.contains(r#"href="/complete?id=a1""#));
    assert!(html.contains(r#"href="/delete?id=a1""#));
    assert!(!html.contains("<s>"));
  }

  #[test]
  fn test_render_completed_is_struck_with_delete_only() {
    let html = render_list(&[item("b2", "Walk dog", true)]);
    assert!(html.contains("<s>Walk dog</s>"));
    assert!(html.contains(r#"href="/delete?id=b2""#));
    assert!(!html.contains("/complete"));
  }

  #[test]
  fn test_render_escapes_ids() {
    let html = render_list(&[item("x\"><b", "t", false)]);
    assert!(html.contains("x&quot;&gt;&lt;b"));
  }

  #[test]
  fn test_splice_replaces_marker_once() {
    let items = vec![item("a1", "Buy milk", false)];
    let spliced = splice("<a><!-- lazy --><b>", &items);
    assert_eq!(spliced, format!("<a>{}<b>", render_list(&items)));
  }

  #[test]
  fn test_splice_only_first_marker() {
    let items = vec![item("a1", "Buy milk", false)];
    let spliced = splice("<!-- lazy -->|<!-- lazy -->", &items);
    assert_eq!(spliced, format!("{}|<!-- lazy -->", render_list(&items)));
  }

  #[test]
  fn test_splice_without_marker_is_unchanged() {
    let items = vec![item("a1", "Buy milk", false)];
    assert_eq!(splice("<html></html>", &items), "<html></html>");
  }

  #[test]
  fn test_splice_without_items_is_unchanged() {
    assert_eq!(splice("<a><!-- lazy --><b>", &[]), "<a><!-- lazy --><b>");
  }
}
