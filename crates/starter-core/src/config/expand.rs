use std::collections::BTreeMap;

/// Variables from the `[env]` table, layered over the process environment.
///
/// The overlay is handed to every child instead of being written into the
/// parent's environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
	overlay: Vec<(String, String)>,
}

impl Environment {
	/// Expands each value in key order; later entries see earlier ones.
	pub fn from_table(table: &BTreeMap<String, String>) -> Self {
		let mut env = Self::default();
		for (key, value) in table {
			let expanded = env.expand(value);
			env.overlay.push((key.clone(), expanded));
		}
		env
	}

	pub fn vars(&self) -> &[(String, String)] {
		&self.overlay
	}

	pub fn lookup(&self, name: &str) -> Option<String> {
		self.overlay
			.iter()
			.rev()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.clone())
			.or_else(|| std::env::var(name).ok())
	}

	/// Substitutes `$NAME`, `${NAME}` and `${NAME:-default}`.
	pub fn expand(&self, s: &str) -> String {
		expand_with(s, |name| self.lookup(name))
	}
}

pub fn expand_with<F>(s: &str, lookup: F) -> String
where
	F: Fn(&str) -> Option<String>,
{
	let resolve = |expr: &str| match expr.split_once(":-") {
		Some((name, default)) => lookup(name)
			.filter(|v| !v.is_empty())
			.unwrap_or_else(|| default.to_string()),
		None => lookup(expr).unwrap_or_default(),
	};

	let mut out = String::with_capacity(s.len());
	let mut rest = s;

	while let Some(pos) = rest.find('$') {
		out.push_str(&rest[..pos]);
		let after = &rest[pos + 1..];

		if let Some(tail) = after.strip_prefix('$') {
			out.push('$');
			rest = tail;
		} else if let Some(braced) = after.strip_prefix('{') {
			match braced.find('}') {
				Some(end) => {
					out.push_str(&resolve(&braced[..end]));
					rest = &braced[end + 1..];
				}
				None => {
					// unterminated, keep it verbatim
					out.push_str(&rest[pos..]);
					rest = "";
				}
			}
		} else {
			let len = after
				.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
				.unwrap_or(after.len());
			if len == 0 {
				out.push('$');
			} else {
				out.push_str(&resolve(&after[..len]));
			}
			rest = &after[len..];
		}
	}

	out.push_str(rest);
	out
}
