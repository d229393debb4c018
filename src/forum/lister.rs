use crate::extractor::markup::find_ci;

/// Characters separating the numeric id from its prefix and suffix in a row id.
const ID_SEPARATORS: &[char] = &['_', '-', ' '];

/// Pulls thread ids out of a forum listing page.
///
/// Pure and single-pass. Ids may repeat; callers that need a set collect
/// into one.
#[derive(Debug, Clone)]
pub struct ThreadLister {
    row_marker: String,
}

impl ThreadLister {
    pub fn new(row_marker: impl Into<String>) -> Self {
        Self {
            row_marker: row_marker.into(),
        }
    }

    pub fn list<'a>(&'a self, page: &'a str) -> ThreadIds<'a> {
        ThreadIds {
            page,
            marker: &self.row_marker,
            pos: 0,
        }
    }
}

pub struct ThreadIds<'a> {
    page: &'a str,
    marker: &'a str,
    pos: usize,
}

impl Iterator for ThreadIds<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            let row = find_ci(self.page, self.marker, self.pos)?;
            let id_start = find_ci(self.page, "id=\"", row)? + 4;
            let id_end = self.page[id_start..].find('"').map(|i| id_start + i)?;
            self.pos = id_end + 1;

            if let Some(id) = parse_row_id(&self.page[id_start..id_end]) {
                return Some(id);
            }
        }
    }
}

/// `thread_101` → 101, `thread_102-foo` → 102. Trailing segments that are
/// not numbers are dropped before parsing.
pub fn parse_row_id(raw: &str) -> Option<i64> {
    raw.split(ID_SEPARATORS)
        .rev()
        .find(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|segment| segment.parse().ok())
}
