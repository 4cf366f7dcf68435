use serde::Deserialize;

/// Host configuration of the binding core.
///
/// Deserializable from the JSON the embedding page passes in, with every field optional:
///
/// ```
/// let config: statetree_dom::BinderConfig = serde_json::from_str(r#"{ "webComponentMode": true }"#).unwrap();
/// assert_eq!(config.service_url, "./");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BinderConfig {
	/// Whether the application runs embedded as web component.
	///
	/// Enables resolution of structured (URI) attribute values against [`service_url`](`BinderConfig::service_url`).
	pub web_component_mode: bool,
	/// Base URL for relative URIs in web component mode.
	pub service_url: String,
	/// How long virtual child lookups wait for a host element's "ready" signal before trying anyway, in milliseconds.
	pub ready_timeout_ms: u32,
}
impl Default for BinderConfig {
	fn default() -> Self {
		Self {
			web_component_mode: false,
			service_url: "./".to_owned(),
			ready_timeout_ms: 5000,
		}
	}
}
impl BinderConfig {
	/// Resolves `uri` against [`service_url`](`BinderConfig::service_url`) unless it's already absolute.
	#[must_use]
	pub fn resolve_uri(&self, uri: &str) -> String {
		if is_absolute(uri) {
			return uri.to_owned();
		}
		let mut base = self.service_url.as_str();
		if !base.ends_with('/') {
			base = base.rfind('/').map_or("", |slash| &base[..=slash]);
		}
		format!("{}{}", base, uri.trim_start_matches("./"))
	}
}

fn is_absolute(uri: &str) -> bool {
	if uri.starts_with("//") {
		return true;
	}
	match uri.find(':') {
		Some(colon) => colon > 0 && uri[..colon].chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolves_relative_uris_only() {
		let config = BinderConfig {
			web_component_mode: true,
			service_url: "http://host/app/".to_owned(),
			..BinderConfig::default()
		};
		assert_eq!(config.resolve_uri("img/a.png"), "http://host/app/img/a.png");
		assert_eq!(config.resolve_uri("./b.png"), "http://host/app/b.png");
		assert_eq!(config.resolve_uri("https://cdn/c.png"), "https://cdn/c.png");
		assert_eq!(config.resolve_uri("//cdn/d.png"), "//cdn/d.png");
	}
}
