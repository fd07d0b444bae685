//! Cluster definition templating
//!
//! `envsubst` semantics: `$NAME` and `${NAME}` are replaced by the variable's
//! value, unknown variables by the empty string. Anything else, including a
//! lone `$`, is copied unchanged.

use std::fmt;

use crate::Result;

/// Renders a cluster definition template
pub trait TemplateRenderer: Send + Sync {
    /// Render `template` into the final document
    fn render(&self, template: &str) -> Result<String>;
}

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// `envsubst`-style substitution
pub struct EnvSubstRenderer {
    lookup: Box<Lookup>,
}

impl EnvSubstRenderer {
    /// Substitute from the process environment
    pub fn from_env() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Substitute from an arbitrary lookup
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl fmt::Debug for EnvSubstRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSubstRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer for EnvSubstRenderer {
    fn render(&self, template: &str) -> Result<String> {
        Ok(substitute(template, &*self.lookup))
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace `$NAME` and `${NAME}` in `template`
pub fn substitute(template: &str, lookup: &Lookup) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            let name_len = braced.find('}').filter(|&end| {
                end > 0
                    && braced[..end].starts_with(is_name_start)
                    && braced[..end].chars().all(is_name_char)
            });
            if let Some(end) = name_len {
                out.push_str(&lookup(&braced[..end]).unwrap_or_default());
                rest = &braced[end + 1..];
                continue;
            }
        } else if after.starts_with(is_name_start) {
            let end = after
                .find(|c: char| !is_name_char(c))
                .unwrap_or(after.len());
            out.push_str(&lookup(&after[..end]).unwrap_or_default());
            rest = &after[end..];
            continue;
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}
