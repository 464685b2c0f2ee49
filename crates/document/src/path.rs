use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

/// One step of a [`Path`]: a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A dotted path addressing a sub-value inside a document, e.g. `a.b.0.c`.
/// All-digit segments address array elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(pub SmallVec<[PathSegment; 4]>);

impl Path {
    pub fn field(name: impl Into<String>) -> Self {
        Path(SmallVec::from_iter([PathSegment::Field(name.into())]))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn push(&mut self, seg: PathSegment) {
        self.0.push(seg);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The leading field name, when the path starts with one.
    pub fn root_field(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Field(f)) => Some(f),
            _ => None,
        }
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match seg {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

/// Path parsing never fails: an empty string is the empty path.
impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Path::default());
        }
        let segs = s
            .split('.')
            .map(|seg| match seg.parse::<usize>() {
                Ok(idx) => PathSegment::Index(idx),
                Err(_) => PathSegment::Field(seg.to_owned()),
            })
            .collect();
        Ok(Path(segs))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        s.parse().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p: Path = "a.b.2.c".into();
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Field("a".into()),
                PathSegment::Field("b".into()),
                PathSegment::Index(2),
                PathSegment::Field("c".into()),
            ]
        );
        assert_eq!(p.to_string(), "a.b.2.c");
    }

    #[test]
    fn prefixes() {
        let a: Path = "s".into();
        let b: Path = "s.b".into();
        assert!(a.is_prefix_of(&b));
        assert!(!b.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&a));
    }
}
