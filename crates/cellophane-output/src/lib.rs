//! Resolution of [`OutputGlob`] templates into concrete [`Output`]s.
//!
//! Templates are expanded against `{workdir}`, `{sample.<dotted>}`,
//! `{samples.<dotted>}` and `{config.<dotted>}` placeholders plus `strftime`
//! codes, then globbed against the workdir; destinations are rooted at
//! `config.resultdir`. Grounded on `shipper::plan`'s use of `cargo_metadata`
//! to turn a declarative description into concrete filesystem facts, and on
//! `bobisme-maw`'s use of the `glob` crate for pattern expansion.

use std::path::{Path, PathBuf};

use cellophane_container::Container;
use cellophane_sample::{Output, OutputDecl, OutputGlob, Sample, Samples};
use cellophane_util::Timestamp;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown placeholder {0:?} in output template")]
    UnknownPlaceholder(String),
    #[error("failed to glob pattern {pattern:?}: {source}")]
    GlobPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("resultdir is not configured")]
    MissingResultDir,
}

/// Expands `{sample,samples,workdir,config}` placeholders and `strftime`
/// codes in `template`, returning the concrete string (not yet globbed).
pub fn expand_template(
    template: &str,
    sample: &Sample,
    samples: &Samples,
    workdir: &Path,
    config: &Container,
    timestamp: Timestamp,
) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;

    while let Some(start) = template[cursor..].find('{') {
        let abs_start = cursor + start;
        let Some(rel_end) = template[abs_start..].find('}') else {
            out.push_str(&template[cursor..]);
            cursor = template.len();
            break;
        };
        let abs_end = abs_start + rel_end;
        out.push_str(&template[cursor..abs_start]);
        let placeholder = &template[abs_start + 1..abs_end];
        out.push_str(&resolve_placeholder(
            placeholder,
            sample,
            samples,
            workdir,
            config,
        )?);
        cursor = abs_end + 1;
    }
    out.push_str(&template[cursor..]);

    Ok(apply_strftime(&out, timestamp))
}

fn resolve_placeholder(
    placeholder: &str,
    sample: &Sample,
    samples: &Samples,
    workdir: &Path,
    config: &Container,
) -> Result<String, ResolveError> {
    if placeholder == "workdir" {
        return Ok(workdir.display().to_string());
    }
    if let Some(rest) = placeholder.strip_prefix("sample.") {
        return resolve_sample_field(rest, sample);
    }
    if placeholder == "samples.len" {
        return Ok(samples.len().to_string());
    }
    if let Some(rest) = placeholder.strip_prefix("config.") {
        return config
            .get_path(rest)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| ResolveError::UnknownPlaceholder(placeholder.to_string()));
    }
    Err(ResolveError::UnknownPlaceholder(placeholder.to_string()))
}

fn resolve_sample_field(field: &str, sample: &Sample) -> Result<String, ResolveError> {
    match field {
        "id" => Ok(sample.id.clone()),
        "uuid" => Ok(sample.uuid().to_string()),
        other => sample
            .meta
            .get_path(other)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| ResolveError::UnknownPlaceholder(format!("sample.{other}"))),
    }
}

fn apply_strftime(template: &str, timestamp: Timestamp) -> String {
    if !template.contains('%') {
        return template.to_string();
    }
    let dt: DateTime<Utc> = DateTime::from_timestamp(timestamp.epoch_secs() as i64, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).expect("epoch is representable"));
    dt.format(template).to_string()
}

/// Resolves `glob` against `workdir`, expanding the template once for each
/// complete sample, and returns the resulting concrete [`Output`]s rooted at
/// `config.resultdir`.
pub fn resolve(
    glob_decl: &OutputGlob,
    samples: &Samples,
    workdir: &Path,
    config: &Container,
    timestamp: Timestamp,
) -> Result<Vec<Output>, ResolveError> {
    let resultdir = config
        .get_path("resultdir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or(ResolveError::MissingResultDir)?;

    let mut outputs = Vec::new();
    for sample in samples.complete().iter() {
        let expanded = expand_template(
            &glob_decl.src_template,
            sample,
            samples,
            workdir,
            config,
            timestamp,
        )?;
        let pattern = if Path::new(&expanded).is_absolute() {
            expanded.clone()
        } else {
            workdir.join(&expanded).display().to_string()
        };
        let matches = glob::glob(&pattern).map_err(|source| ResolveError::GlobPattern {
            pattern: pattern.clone(),
            source,
        })?;
        for entry in matches.flatten() {
            let file_name = entry
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let dst_dir = glob_decl
                .dst_dir
                .clone()
                .map(PathBuf::from)
                .unwrap_or_default();
            let dst_name = glob_decl.dst_name.clone().unwrap_or(file_name);
            outputs.push(Output {
                src: entry,
                dst: resultdir.join(dst_dir).join(dst_name),
                checkpoint: glob_decl.checkpoint.clone(),
                optional: glob_decl.optional,
            });
        }
    }
    Ok(outputs)
}

/// Resolves every `OutputGlob` declared on `samples` (leaving concrete
/// `Output`s untouched) and returns the full set of concrete outputs.
pub fn resolve_all(
    samples: &Samples,
    workdir: &Path,
    config: &Container,
    timestamp: Timestamp,
) -> Result<Vec<Output>, ResolveError> {
    let mut resolved = Vec::new();
    for decl in samples.outputs() {
        match decl {
            OutputDecl::Output(concrete) => resolved.push(concrete.clone()),
            OutputDecl::Glob(glob_decl) => {
                resolved.extend(resolve(glob_decl, samples, workdir, config, timestamp)?);
            }
        }
    }
    Ok(resolved)
}
