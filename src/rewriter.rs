//! Response Rewriter: walks a JSON-RPC response, turns configured
//! file-path fields and embedded job-dir paths into download links.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// One file discovered while walking a response, in first-encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub name: String,
    pub url: String,
}

fn embedded_path_pattern(job_id: &str) -> Regex {
    // Anchored on the configured jobs root rather than a hardcoded `/tmp`
    // so a reconfigured MCPO_JOBS_DIR doesn't silently stop matching.
    Regex::new(&format!(
        r"{}/{}/([^\s)]+\.\w+)",
        regex::escape(job_id_prefix()),
        regex::escape(job_id)
    ))
    .expect("embedded path pattern is well-formed")
}

static JOBS_ROOT: OnceLock<String> = OnceLock::new();

/// Sets the jobs-root prefix (e.g. `/tmp/mcpo-jobs`) used to recognize
/// embedded absolute paths in text content. Must be called once before the
/// rewriter runs; defaults to `/tmp/mcpo-jobs` if never set.
pub fn set_jobs_root_prefix(prefix: &str) {
    let _ = JOBS_ROOT.set(prefix.trim_end_matches('/').to_string());
}

fn job_id_prefix() -> &'static str {
    JOBS_ROOT.get_or_init(|| "/tmp/mcpo-jobs".to_string())
}

/// Walks `response` in place, detecting file-path fields and embedded job-dir
/// paths, and returns the files discovered (first-encounter order,
/// deduplicated by name). Recursion order is object keys in encounter order,
/// then array elements left-to-right.
pub fn rewrite(
    response: &mut Value,
    job_id: &str,
    base_url: &str,
    file_path_fields: &HashSet<String>,
) -> Vec<DiscoveredFile> {
    let embedded_pattern = embedded_path_pattern(job_id);
    let mut files = Vec::new();
    let mut seen_names = HashSet::new();

    walk(
        response,
        job_id,
        base_url,
        file_path_fields,
        &embedded_pattern,
        &mut files,
        &mut seen_names,
    );

    if !files.is_empty() {
        append_download_links(response, &files);
    }

    files
}

fn walk(
    value: &mut Value,
    job_id: &str,
    base_url: &str,
    file_path_fields: &HashSet<String>,
    embedded_pattern: &Regex,
    files: &mut Vec<DiscoveredFile>,
    seen_names: &mut HashSet<String>,
) {
    match value {
        Value::Object(map) => {
            // `_download_url` marks an object this function already visited;
            // skipping it keeps a second pass over an already-rewritten
            // response from re-discovering the same file and re-appending a
            // download link on a second pass over the same response.
            if !map.contains_key("_download_url") {
                // Iterate the object's own keys in encounter order, filtered
                // by membership in `file_path_fields`, rather than the set
                // itself (whose iteration order is unspecified).
                let candidate_fields: Vec<String> = map
                    .keys()
                    .filter(|k| file_path_fields.contains(k.as_str()))
                    .cloned()
                    .collect();
                for field in candidate_fields {
                    let Some(path) = map.get(&field).and_then(Value::as_str) else {
                        continue;
                    };
                    let Some(filename) = extract_filename(path, job_id) else {
                        continue;
                    };
                    let url = format!("{base_url}/files/{job_id}/{filename}");
                    record(files, seen_names, filename.clone(), url.clone());
                    map.insert("_download_url".to_string(), Value::String(url));
                    debug!(field, path, "added file info from field");
                }
            }

            if let Some(Value::Array(items)) = map.get_mut("content") {
                for item in items.iter_mut() {
                    rewrite_content_item(item, job_id, base_url, embedded_pattern, files, seen_names);
                }
            }

            for (_, v) in map.iter_mut() {
                walk(v, job_id, base_url, file_path_fields, embedded_pattern, files, seen_names);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                walk(item, job_id, base_url, file_path_fields, embedded_pattern, files, seen_names);
            }
        }
        _ => {}
    }
}

fn rewrite_content_item(
    item: &mut Value,
    job_id: &str,
    base_url: &str,
    embedded_pattern: &Regex,
    files: &mut Vec<DiscoveredFile>,
    seen_names: &mut HashSet<String>,
) {
    let Value::Object(map) = item else { return };
    if map.get("type").and_then(Value::as_str) != Some("text") {
        return;
    }
    let Some(Value::String(text)) = map.get("text") else {
        return;
    };

    let mut rewritten = text.clone();
    for capture in embedded_pattern.captures_iter(text) {
        let filename = capture[1].to_string();
        let full_match = capture[0].to_string();
        let url = format!("{base_url}/files/{job_id}/{filename}");
        record(files, seen_names, filename.clone(), url);
        rewritten = rewritten.replace(&full_match, &filename);
    }

    if rewritten != *text {
        map.insert("text".to_string(), Value::String(rewritten));
    }
}

fn extract_filename(path: &str, job_id: &str) -> Option<String> {
    // Literal substring per spec.md §4.6 rule 1, matching the source exactly
    // — not the configurable jobs-root prefix used for embedded-text paths.
    let marker = format!("/mcpo-jobs/{}/", job_id);
    if let Some(idx) = path.find(&marker) {
        return Some(path[idx + marker.len()..].to_string());
    }
    if !std::path::Path::new(path).is_absolute() {
        return std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
    }
    None
}

fn record(files: &mut Vec<DiscoveredFile>, seen_names: &mut HashSet<String>, name: String, url: String) {
    if seen_names.insert(name.clone()) {
        files.push(DiscoveredFile { name, url });
    }
}

/// Appends one markdown download-link text item per discovered file to
/// `result.content`, creating the array if absent.
fn append_download_links(response: &mut Value, files: &[DiscoveredFile]) {
    let Some(result) = response.get_mut("result").and_then(Value::as_object_mut) else {
        return;
    };

    let text = files
        .iter()
        .map(|f| format!("📎 ダウンロード: [{}]({})", f.name, f.url))
        .collect::<Vec<_>>()
        .join("\n");

    let item = serde_json::json!({ "type": "text", "text": text });

    match result.get_mut("content") {
        Some(Value::Array(content)) => content.push(item),
        None => {
            result.insert("content".to_string(), Value::Array(vec![item]));
        }
        Some(_) => {
            // `content` exists but isn't an array; leave it untouched rather
            // than clobbering whatever the child put there.
        }
    }
}
