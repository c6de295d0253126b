//! Catalog path helpers
//!
//! Catalog paths are root-relative, `/`-separated strings regardless of the
//! protocol or host OS they came from. Every path written to or compared
//! against the catalog goes through [`normalize_path`] first.

/// Normalize a root-relative path: `/` separators, a single leading `/`, no
/// trailing `/` (except for the root itself), no empty or `.` segments.
pub fn normalize_path(path: &str) -> String {
	let segments: Vec<&str> = path
		.split(['/', '\\'])
		.filter(|segment| !segment.is_empty() && *segment != ".")
		.collect();

	if segments.is_empty() {
		"/".to_string()
	} else {
		format!("/{}", segments.join("/"))
	}
}

/// Last path segment, or empty for the root
pub fn file_name(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or("")
}

/// Parent directory, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
	if path == "/" {
		return None;
	}
	match path.rfind('/') {
		Some(0) => Some("/"),
		Some(index) => Some(&path[..index]),
		None => None,
	}
}

/// True when `path` lies strictly below `directory`
pub fn is_descendant(path: &str, directory: &str) -> bool {
	if directory == "/" {
		return path != "/" && path.starts_with('/');
	}
	path.len() > directory.len()
		&& path.starts_with(directory)
		&& path.as_bytes()[directory.len()] == b'/'
}

/// Move `path` from under `old_prefix` to under `new_prefix`, keeping the
/// relative suffix. `None` when `path` is not `old_prefix` or below it.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
	if path == old_prefix {
		return Some(new_prefix.to_string());
	}
	if !is_descendant(path, old_prefix) {
		return None;
	}
	let suffix = if old_prefix == "/" { path } else { &path[old_prefix.len()..] };
	if new_prefix == "/" {
		Some(suffix.to_string())
	} else {
		Some(format!("{new_prefix}{suffix}"))
	}
}
