//! 顺序标签分配
//!
//! 为没有可读标签的子图分配下一个未被占用的标签：
//! `A..Z`，然后 `AA, AB, …, ZZ`，全部用尽时返回 [`UNKNOWN_LABEL`]。
//! 所有比较均不区分大小写。

use std::collections::HashSet;

/// 标签全部用尽时的兜底标签
pub const UNKNOWN_LABEL: &str = "unknown";

const LETTERS: std::ops::RangeInclusive<char> = 'A'..='Z';

/// 返回第一个不在 `used` 中的标签（不区分大小写）
pub fn next_label<I, S>(used: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut labels = UsedLabels::default();
    for label in used {
        labels.insert(label.as_ref());
    }
    labels.next_free()
}

/// 已占用标签集合，内部统一存储为大写
#[derive(Debug, Clone, Default)]
pub struct UsedLabels {
    labels: HashSet<String>,
}

impl UsedLabels {
    pub fn insert(&mut self, label: &str) -> bool {
        self.labels.insert(normalize(label))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(&normalize(label))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 下一个空闲标签（不占用）
    pub fn next_free(&self) -> String {
        single_letters()
            .chain(double_letters())
            .find(|candidate| !self.labels.contains(candidate))
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    /// 取出下一个空闲标签并标记为已占用
    pub fn allocate(&mut self) -> String {
        let label = self.next_free();
        self.insert(&label);
        label
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_uppercase()
}

fn single_letters() -> impl Iterator<Item = String> {
    LETTERS.map(String::from)
}

fn double_letters() -> impl Iterator<Item = String> {
    LETTERS.flat_map(|first| LETTERS.map(move |second| format!("{first}{second}")))
}
