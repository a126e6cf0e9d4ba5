use std::fmt;

/// A URL path template with `{placeholder}` slots, e.g.
/// `api/v1/namespaces/{namespace}/pods/{name}`.
///
/// Templates are relative to the API server endpoint; leading and trailing
/// slashes are ignored.
#[derive(Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Vec<Part>>,
    params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Param(String),
}

impl UrlTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments: Vec<_> = raw
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(parse_segment)
            .collect();

        let mut params = Vec::new();
        for part in segments.iter().flatten() {
            if let Part::Param(name) = part {
                if !params.contains(name) {
                    params.push(name.clone());
                }
            }
        }

        Self {
            raw,
            segments,
            params,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in order of first appearance.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether `lookup` can fill every placeholder.
    pub fn is_satisfied_by<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> bool {
        self.params.iter().all(|param| lookup(param).is_some())
    }

    /// Path segments with every placeholder replaced, unescaped.
    ///
    /// Returns `None` if a placeholder has no value.
    pub fn expand<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> Option<Vec<String>> {
        self.segments
            .iter()
            .map(|parts| {
                let mut segment = String::new();
                for part in parts {
                    match part {
                        Part::Literal(text) => segment.push_str(text),
                        Part::Param(name) => segment.push_str(lookup(name)?),
                    }
                }
                Some(segment)
            })
            .collect()
    }
}

impl fmt::Debug for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlTemplate").field(&self.raw).finish()
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(segment: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut rest = segment;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|offset| open + offset) else {
            break;
        };
        let name = &rest[open + 1..close];
        if !is_param_name(name) {
            // not a placeholder; keep the brace as text
            push_literal(&mut parts, &rest[..=open]);
            rest = &rest[open + 1..];
            continue;
        }

        push_literal(&mut parts, &rest[..open]);
        parts.push(Part::Param(name.to_owned()));
        rest = &rest[close + 1..];
    }

    push_literal(&mut parts, rest);
    parts
}

fn push_literal(parts: &mut Vec<Part>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Part::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(Part::Literal(text.to_owned()));
    }
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
