// Copyright 2024-2025 Irreducible Inc.

use std::fmt::{self, Write};

/// A labelled tree printed with box-drawing guides. Multi-line labels stay aligned.
pub struct LogTree {
    pub label: String,
    pub children: Vec<LogTree>,
}

impl LogTree {
    pub fn leaf(label: String) -> Self {
        Self {
            label,
            children: Vec::new(),
        }
    }

    fn display_children(&self, f: &mut fmt::Formatter<'_>, spaces: &mut Vec<bool>) -> fmt::Result {
        for (i, child) in self.children.iter().enumerate() {
            let mut prefix = String::new();
            for is_space in spaces.iter() {
                prefix.write_str(if *is_space { "    " } else { "│   " })?;
            }

            let is_last = i == self.children.len() - 1;
            for (index, label) in child.label.split('\n').enumerate() {
                let guide = match (index == 0, is_last) {
                    (true, true) => "└── ",
                    (true, false) => "├── ",
                    (false, true) => "    ",
                    (false, false) => "│   ",
                };
                writeln!(f, "{prefix}{guide}{label}")?;
            }

            if !child.children.is_empty() {
                spaces.push(is_last);
                child.display_children(f, spaces)?;
                spaces.pop();
            }
        }
        Ok(())
    }
}

impl fmt::Display for LogTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.label)?;
        self.display_children(f, &mut Vec::new())
    }
}
