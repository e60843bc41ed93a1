// Training windows and memory-carrying groups.
//
// A window is an `(x, y)` pair of `x_len` words where `y` is `x` shifted one
// step ahead in the source. Windows are cut without overlap in two passes:
//
// - forward: starts at 0, x_len, 2·x_len, … while a full window plus its
//   shifted target fits (`start + x_len + 1 <= len`);
// - reverse: ends walk back from the end of the source by x_len, so the
//   trailing words a forward pass would drop are covered; the collected
//   windows are put back in forward order.
//
// Each pass is then grouped: a group is `group_size` consecutive windows, and
// group starts advance by `2 · group_size` windows, so every other run of
// windows is skipped. Short trailing groups are dropped, never padded.

use crate::vocab::Word;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub x: Vec<Word>,
    pub y: Vec<Word>,
}

/// `group_size` windows trained in order with memory carried between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub windows: Vec<Window>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

pub fn forward_windows(words: &[Word], x_len: usize) -> Vec<Window> {
    if x_len == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut start = 0;
    while start + x_len < words.len() {
        windows.push(Window {
            x: words[start..start + x_len].to_vec(),
            y: words[start + 1..start + x_len + 1].to_vec(),
        });
        start += x_len;
    }
    windows
}

/// Windows anchored at the end of the source, returned in forward order.
pub fn reverse_windows(words: &[Word], x_len: usize) -> Vec<Window> {
    if x_len == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut end = words.len();
    while end > x_len {
        windows.push(Window {
            x: words[end - x_len - 1..end - 1].to_vec(),
            y: words[end - x_len..end].to_vec(),
        });
        end -= x_len;
    }
    windows.reverse();
    windows
}

pub fn group_windows(windows: Vec<Window>, group_size: usize) -> Vec<Group> {
    if group_size == 0 {
        return Vec::new();
    }
    let mut slots: Vec<Option<Window>> = windows.into_iter().map(Some).collect();
    let mut groups = Vec::new();
    let mut start = 0;
    while start + group_size <= slots.len() {
        let windows = slots[start..start + group_size]
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        groups.push(Group { windows });
        start += 2 * group_size;
    }
    groups
}

/// Forward groups followed by reverse groups for one source.
pub fn build_groups(words: &[Word], x_len: usize, group_size: usize) -> Vec<Group> {
    let mut groups = group_windows(forward_windows(words, x_len), group_size);
    groups.extend(group_windows(reverse_windows(words, x_len), group_size));
    groups
}
