//! Tag parameter-spec parsing.
//!
//! A spec is a comma list of parameter declarations: `name`,
//! `name = default` (the default is compiled as an expression when the
//! parameter is omitted at a call site), or `&name` (the call site must
//! supply a bare variable reference).

use std::rc::Rc;

use crate::hash::name_hash;
use crate::scan;

/// One declared tag parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamDecl {
    pub name: Rc<str>,
    pub hash: u32,
    /// Default-value expression source, compiled at call sites that omit
    /// the parameter.
    pub default: Option<Rc<str>>,
    /// Call sites must bind this parameter to a bare variable reference.
    pub by_ref: bool,
}

/// Errors from parameter-spec parsing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("empty parameter name in spec")]
    EmptyName,
    #[error("empty default value for parameter '{0}'")]
    EmptyDefault(String),
    #[error("expected ',' or '=' after parameter '{0}'")]
    UnexpectedChar(String),
    #[error("delimiter must be 1..{0} bytes")]
    BadDelimiter(usize),
}

/// Parse a parameter spec. `None` and blank specs declare no parameters.
pub fn parse_param_spec(spec: Option<&str>) -> Result<Vec<ParamDecl>, SpecError> {
    let mut params = Vec::new();
    let Some(spec) = spec else {
        return Ok(params);
    };

    let mut rest = spec;
    while !rest.is_empty() {
        rest = scan::trim_space(rest);
        if rest.is_empty() {
            break;
        }

        let by_ref = if let Some(r) = rest.strip_prefix('&') {
            rest = r;
            true
        } else {
            false
        };

        let (name, after) = scan::word(rest);
        if name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        rest = scan::trim_space(after);

        let mut default = None;
        if let Some(r) = rest.strip_prefix('=') {
            let value_src = scan::trim_space(r);
            let end = default_end(value_src);
            let value = &value_src[..end];
            if value.is_empty() {
                return Err(SpecError::EmptyDefault(name.to_owned()));
            }
            default = Some(Rc::from(value));
            rest = &value_src[end..];
        }

        params.push(ParamDecl {
            name: Rc::from(name),
            hash: name_hash(name),
            default,
            by_ref,
        });

        rest = scan::trim_space(rest);
        match rest.as_bytes().first() {
            None => break,
            Some(b',') => rest = &rest[1..],
            Some(_) => return Err(SpecError::UnexpectedChar(name.to_owned())),
        }
    }

    Ok(params)
}

/// Find the end of a default value: the first comma not escaped by `\`.
fn default_end(src: &str) -> usize {
    let bytes = src.as_bytes();
    let mut pos = 0;
    while let Some(off) = src[pos..].find(',') {
        let at = pos + off;
        if at > 0 && bytes[at - 1] == b'\\' {
            pos = at + 1;
            continue;
        }
        return at;
    }
    src.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_names() {
        let params = parse_param_spec(Some("from, item, key")).unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(&*params[0].name, "from");
        assert!(params.iter().all(|p| p.default.is_none() && !p.by_ref));
    }

    #[test]
    fn parses_refs_and_defaults() {
        let params = parse_param_spec(Some("&var, offset = 0, name = \"x\"")).unwrap();
        assert!(params[0].by_ref);
        assert_eq!(params[1].default.as_deref(), Some("0"));
        assert_eq!(params[2].default.as_deref(), Some("\"x\""));
    }

    #[test]
    fn none_spec_is_empty() {
        assert!(parse_param_spec(None).unwrap().is_empty());
        assert!(parse_param_spec(Some("")).unwrap().is_empty());
    }

    #[test]
    fn escaped_comma_stays_in_default() {
        let params = parse_param_spec(Some("list = a\\,b, next = 1")).unwrap();
        assert_eq!(params[0].default.as_deref(), Some("a\\,b"));
        assert_eq!(&*params[1].name, "next");
    }

    #[test]
    fn rejects_missing_name() {
        assert_eq!(parse_param_spec(Some("&, x")), Err(SpecError::EmptyName));
    }
}
