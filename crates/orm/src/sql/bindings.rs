//! Parameter bookkeeping for compilation
//!
//! Placeholders are emitted as named `:name` markers in textual order. The
//! [`ParamSink`] hands out collision-free names and records each value under
//! the clause category that is being rendered, so the flattened category map
//! and the placeholder order always agree.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};

/// Clause category a bound value belongs to, in compile order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingCategory {
    Select,
    From,
    Join,
    Where,
    Having,
    Order,
    Union,
}

impl BindingCategory {
    pub const ALL: [BindingCategory; 7] = [
        BindingCategory::Select,
        BindingCategory::From,
        BindingCategory::Join,
        BindingCategory::Where,
        BindingCategory::Having,
        BindingCategory::Order,
        BindingCategory::Union,
    ];
}

impl fmt::Display for BindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingCategory::Select => "select",
            BindingCategory::From => "from",
            BindingCategory::Join => "join",
            BindingCategory::Where => "where",
            BindingCategory::Having => "having",
            BindingCategory::Order => "order",
            BindingCategory::Union => "union",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BindingCategory {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BindingCategory::ALL
            .into_iter()
            .find(|category| category.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrmError::InvalidArgument(format!("Unknown binding category '{}'", s)))
    }
}

/// Bound values grouped by clause category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: IndexMap<BindingCategory, Vec<DatabaseValue>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: BindingCategory, value: DatabaseValue) {
        self.values.entry(category).or_default().push(value);
    }

    pub fn extend(&mut self, category: BindingCategory, values: impl IntoIterator<Item = DatabaseValue>) {
        self.values.entry(category).or_default().extend(values);
    }

    pub fn get(&self, category: BindingCategory) -> &[DatabaseValue] {
        self.values.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every value of one category
    pub fn clear(&mut self, category: BindingCategory) {
        self.values.shift_remove(&category);
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Vec::is_empty)
    }

    /// All values in fixed clause order
    pub fn flatten(&self) -> Vec<DatabaseValue> {
        BindingCategory::ALL
            .iter()
            .flat_map(|category| self.get(*category).iter().cloned())
            .collect()
    }
}

/// State saved by [`ParamSink::begin`] and restored by [`ParamSink::end`]
#[derive(Debug)]
pub struct Frame {
    category: BindingCategory,
    pending: VecDeque<DatabaseValue>,
}

/// Collects named parameters while SQL text is produced
#[derive(Debug)]
pub struct ParamSink {
    counters: HashMap<String, usize>,
    used: HashSet<String>,
    named: Vec<(String, DatabaseValue)>,
    bindings: Bindings,
    category: BindingCategory,
    depth: usize,
    pending: VecDeque<DatabaseValue>,
}

impl Default for ParamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSink {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            used: HashSet::new(),
            named: Vec::new(),
            bindings: Bindings::new(),
            category: BindingCategory::Where,
            depth: 0,
            pending: VecDeque::new(),
        }
    }

    /// Start rendering a clause category.
    ///
    /// `manual` holds values registered through `add_binding`; raw fragments in
    /// this category consume them once their own bindings run out. Nested
    /// sub-queries keep recording under the outermost category so their values
    /// land where their SQL textually appears.
    pub fn begin(&mut self, category: BindingCategory, manual: &[DatabaseValue]) -> Frame {
        let frame = Frame {
            category: self.category,
            pending: std::mem::replace(&mut self.pending, manual.iter().cloned().collect()),
        };
        if self.depth == 0 {
            self.category = category;
        }
        self.depth += 1;
        frame
    }

    /// Finish a category; unconsumed manual bindings would misalign parameters
    pub fn end(&mut self, frame: Frame) -> OrmResult<()> {
        let leftover = self.pending.len();
        self.depth -= 1;
        self.category = frame.category;
        self.pending = frame.pending;
        if leftover > 0 {
            return Err(OrmError::InvalidArgument(format!(
                "{} bound value(s) have no matching placeholder",
                leftover
            )));
        }
        Ok(())
    }

    /// Bind a value and return its `:name` placeholder
    pub fn bind(&mut self, column: &str, value: DatabaseValue) -> String {
        let name = self.next_name(column);
        self.bindings.push(self.category, value.clone());
        self.named.push((name.clone(), value));
        format!(":{}", name)
    }

    /// Replace `?` marks outside quotes with named placeholders
    pub fn expand_raw(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<String> {
        let mut own = bindings.iter().cloned();
        let mut out = String::with_capacity(sql.len());
        let mut quote: Option<char> = None;

        for c in sql.chars() {
            match (quote, c) {
                (Some(q), _) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), _) => out.push(c),
                (None, '\'' | '"' | '`') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') => {
                    let value = own.next().or_else(|| self.pending.pop_front()).ok_or_else(|| {
                        OrmError::InvalidArgument(format!(
                            "Raw fragment '{}' has more placeholders than bound values",
                            sql
                        ))
                    })?;
                    out.push_str(&self.bind("raw", value));
                }
                (None, _) => out.push(c),
            }
        }

        let unused = own.count();
        if unused > 0 {
            return Err(OrmError::InvalidArgument(format!(
                "Raw fragment '{}' received {} more value(s) than it has placeholders",
                sql, unused
            )));
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    /// Named parameters in placeholder order
    pub fn named(&self) -> &[(String, DatabaseValue)] {
        &self.named
    }

    pub fn finish(self) -> (Vec<(String, DatabaseValue)>, Bindings) {
        (self.named, self.bindings)
    }

    fn next_name(&mut self, column: &str) -> String {
        let mut base: String = column
            .rsplit('.')
            .next()
            .unwrap_or(column)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
            base = format!("p{}", base);
        }

        loop {
            let counter = self.counters.entry(base.clone()).or_insert(0);
            *counter += 1;
            let candidate = format!("{}{}", base, counter);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
