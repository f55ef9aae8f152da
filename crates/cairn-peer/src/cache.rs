//! The peer's local copy of the registry's offerings view.
//!
//! Written only by the demultiplexer (wholesale replacement on every TABLE),
//! read only by the command task. A coarse mutex is all the coordination
//! that traffic pattern needs.

use std::sync::Mutex;

use cairn_core::wire::{composite_key, split_key, FileLocation, OfferingsView};

#[derive(Debug, Default)]
pub struct OfferingsCache {
    inner: Mutex<OfferingsView>,
}

impl OfferingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly decoded view. The swap is atomic under the lock, so
    /// a concurrent `list` sees either the old view or the new, never a mix.
    pub fn replace(&self, view: OfferingsView) {
        *self.inner.lock().expect("offerings cache poisoned") = view;
    }

    /// Clone of the current view, for callers that need more than one entry.
    pub fn snapshot(&self) -> OfferingsView {
        self.inner.lock().expect("offerings cache poisoned").clone()
    }

    pub fn lookup(&self, filename: &str, owner: &str) -> Option<FileLocation> {
        self.inner
            .lock()
            .expect("offerings cache poisoned")
            .get(&composite_key(filename, owner))
            .cloned()
    }

    /// Render the `list` table, or `None` when there is nothing to show.
    ///
    /// Rows are sorted by `(filename, owner)`. That is *not* the raw order of
    /// the composite keys: `|` sorts above every lowercase letter, so
    /// `"ab|x"` precedes `"a|y"` as strings even though `("a", "y")` comes
    /// first. Split before sorting.
    pub fn render(&self) -> Option<String> {
        let inner = self.inner.lock().expect("offerings cache poisoned");
        if inner.is_empty() {
            return None;
        }

        let mut rows: Vec<[String; 4]> = inner
            .iter()
            .filter_map(|(key, location)| {
                let (filename, owner) = split_key(key)?;
                Some([
                    filename.to_string(),
                    owner.to_string(),
                    location.host.to_string(),
                    location.tcp_port.to_string(),
                ])
            })
            .collect();
        drop(inner);
        rows.sort();

        let header = ["FILENAME", "OWNER", "IP ADDRESS", "TCP PORT"];
        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        let mut out = String::new();
        render_row(&mut out, &header.map(String::from), &widths);
        for row in &rows {
            render_row(&mut out, row, &widths);
        }
        Some(out)
    }
}

fn render_row(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        if i < cells.len() - 1 {
            for _ in cell.len()..*width {
                out.push(' ');
            }
        }
    }
    out.push('\n');
}
