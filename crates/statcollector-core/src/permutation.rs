//! Source-group permutation engine (`spec.md §4.6`).
//!
//! A single `SourceConfig` may carry one or more *template tokens* in its
//! `config` values (any string field, matched by regex, not just `url`).
//! Each token expands to a list of strings; the Cartesian product of all
//! tokens in one template produces one concrete `SourceConfig` per
//! combination, each with its own deterministic `source_group` suffix.

use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use statcollector_types::config::SourceConfig;
use statcollector_types::PipelineError;

/// Matches `{a,b,c}`, `[1-5]`, `[a-e]`, `$<FILE:/path>`, `$<EXEC:cmd args>`.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[^{}]+\}|\[[0-9]+-[0-9]+\]|\[[a-zA-Z]-[a-zA-Z]\]|\$<FILE:[^>]+>|\$<EXEC:[^>]+>").unwrap()
});

/// Expands every permutation token found in `cfg`'s serialized form and
/// returns one `SourceConfig` per resulting combination — `vec![cfg]`
/// unchanged if it carries no tokens at all.
///
/// Every returned instance shares the same `sourceGroup` (`spec.md §4.6`:
/// "driver + per-instance multiplier value + shared `sourceGroup` name") —
/// the original spec's `source_group`, or the pre-expansion `name` if none
/// was set. Per-instance identity lives in `name`: if the template text
/// itself varied across the combination (the common case — the multiplier
/// token sits inside `name`), the rendered name is already unique; if
/// `name` held no token and so rendered identically for every combination,
/// the combo's values are appended to disambiguate it, since the source
/// registry is keyed by name and would otherwise silently collapse every
/// instance but one via replace-on-duplicate.
pub fn expand(cfg: SourceConfig) -> Result<Vec<SourceConfig>, PipelineError> {
    let group_name = cfg.source_group.clone().or_else(|| cfg.name.clone());
    let base_name = cfg.name.clone();
    let template = serde_yaml::to_string(&cfg)?;
    let tokens: Vec<&str> = TOKEN_RE.find_iter(&template).map(|m| m.as_str()).collect();
    if tokens.is_empty() {
        return Ok(vec![cfg]);
    }

    let mut expansions: Vec<Vec<String>> = Vec::with_capacity(tokens.len());
    for token in &tokens {
        expansions.push(expand_token(token)?);
    }

    let mut instances = Vec::new();
    for combo in cartesian(&expansions) {
        let mut rendered = template.clone();
        for (token, value) in tokens.iter().zip(combo.iter()) {
            rendered = rendered.replacen(token, value, 1);
        }
        let mut instance: SourceConfig = serde_yaml::from_str(&rendered)?;
        instance.source_group = group_name.clone();
        if instance.name == base_name {
            let suffix = combo.join(".");
            instance.name = Some(match &base_name {
                Some(n) => format!("{n}-{suffix}"),
                None => suffix,
            });
        }
        instances.push(instance);
    }
    // Deterministic order regardless of HashMap/filesystem iteration upstream.
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(instances)
}

fn expand_token(token: &str) -> Result<Vec<String>, PipelineError> {
    if let Some(inner) = token.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return Ok(inner.split(',').map(|s| s.trim().to_string()).collect());
    }
    if let Some(inner) = token.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Ok(expand_range(inner));
    }
    if let Some(path) = token.strip_prefix("$<FILE:").and_then(|s| s.strip_suffix('>')) {
        let content = std::fs::read_to_string(path)?;
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect());
    }
    if let Some(cmdline) = token.strip_prefix("$<EXEC:").and_then(|s| s.strip_suffix('>')) {
        return exec_lines(cmdline);
    }
    Ok(vec![token.to_string()])
}

fn expand_range(inner: &str) -> Vec<String> {
    let Some((lo, hi)) = inner.split_once('-') else {
        return vec![inner.to_string()];
    };
    if let (Ok(lo_n), Ok(hi_n)) = (lo.parse::<i64>(), hi.parse::<i64>()) {
        if lo_n <= hi_n {
            return (lo_n..=hi_n).map(|n| n.to_string()).collect();
        }
        return (hi_n..=lo_n).rev().map(|n| n.to_string()).collect();
    }
    let (lo_c, hi_c) = (lo.chars().next().unwrap(), hi.chars().next().unwrap());
    if lo_c <= hi_c {
        (lo_c..=hi_c).map(|c| c.to_string()).collect()
    } else {
        (hi_c..=lo_c).rev().map(|c| c.to_string()).collect()
    }
}

/// Runs `cmdline` via `/bin/sh -c` and splits stdout into trimmed,
/// non-empty lines (`spec.md §4.6`'s `$<EXEC:...>` token). A non-zero exit
/// or a command that can't even be spawned aborts the whole expansion
/// (`spec.md §4.6`: "non-zero exit aborts the whole expansion") rather than
/// silently registering zero Sources for the group.
fn exec_lines(cmdline: &str) -> Result<Vec<String>, PipelineError> {
    match Command::new("/bin/sh").arg("-c").arg(cmdline).output() {
        Ok(output) if output.status.success() => Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()),
        Ok(output) => Err(PipelineError::ExecTokenFailed {
            cmdline: cmdline.to_string(),
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
        Err(err) => Err(PipelineError::ExecTokenFailed {
            cmdline: cmdline.to_string(),
            reason: format!("could not be run: {err}"),
        }),
    }
}

fn cartesian(lists: &[Vec<String>]) -> Vec<Vec<String>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cfg(url: &str) -> SourceConfig {
        SourceConfig {
            name: Some("web".into()),
            driver: "Exec".into(),
            config: serde_yaml::from_str(&format!("{{url: \"{url}\"}}")).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn no_token_returns_single_config_unchanged() {
        let cfg = base_cfg("http://host1/stats");
        let expanded = expand(cfg).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].source_group, None);
    }

    #[test]
    fn brace_list_expands_to_one_source_per_item() {
        let cfg = base_cfg("http://{web1,web2,web3}/stats");
        let expanded = expand(cfg).unwrap();
        assert_eq!(expanded.len(), 3);
        // The multiplier lives in `config.url`, not `name`, so every
        // instance must still get a distinct disambiguated name...
        let names: Vec<_> = expanded.iter().map(|c| c.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["web-web1", "web-web2", "web-web3"]);
        // ...while all of them share one sourceGroup (`spec.md §4.6`).
        assert!(expanded.iter().all(|c| c.source_group.as_deref() == Some("web")));
    }

    #[test]
    fn numeric_range_expands_inclusive() {
        let cfg = base_cfg("http://web[1-3]/stats");
        let expanded = expand(cfg).unwrap();
        assert_eq!(expanded.len(), 3);
    }

    #[test]
    fn two_tokens_produce_cartesian_product() {
        let cfg = base_cfg("http://{a,b}[1-2]/stats");
        let expanded = expand(cfg).unwrap();
        assert_eq!(expanded.len(), 4);
    }

    #[test]
    fn expansion_order_is_deterministic() {
        let cfg = base_cfg("http://{z,a,m}/stats");
        let first = expand(cfg.clone()).unwrap();
        let second = expand(cfg).unwrap();
        let first_names: Vec<_> = first.iter().map(|c| c.name.clone()).collect();
        let second_names: Vec<_> = second.iter().map(|c| c.name.clone()).collect();
        assert_eq!(first_names, second_names);
        assert_eq!(
            first_names,
            vec![Some("web-a".into()), Some("web-m".into()), Some("web-z".into())]
        );
    }

    /// `spec.md §8` S5: `web-[1-3]-{a,b}.svc` expands to 6 Sources, named in
    /// stable sorted order, all sharing one `sourceGroup`.
    #[test]
    fn s5_permutation_expansion_scenario() {
        let cfg = SourceConfig {
            name: Some("web-[1-3]-{a,b}.svc".into()),
            driver: "Exec".into(),
            ..Default::default()
        };
        let expanded = expand(cfg).unwrap();
        let names: Vec<_> = expanded.iter().map(|c| c.name.clone().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "web-1-a.svc",
                "web-1-b.svc",
                "web-2-a.svc",
                "web-2-b.svc",
                "web-3-a.svc",
                "web-3-b.svc",
            ]
        );
        let groups: Vec<_> = expanded.iter().map(|c| c.source_group.clone()).collect();
        assert!(groups.iter().all(|g| g == &groups[0]), "every instance must share one sourceGroup");
    }

    #[test]
    fn file_token_drops_blank_and_comment_lines() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "web1\n# a comment\n\nweb2\n").unwrap();
        let cfg = base_cfg(&format!("http://$<FILE:{}>/stats", file.path().display()));
        let expanded = expand(cfg).unwrap();
        let names: Vec<_> = expanded.iter().map(|c| c.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["web-web1", "web-web2"]);
    }

    #[test]
    fn exec_token_failure_aborts_the_whole_expansion() {
        let cfg = base_cfg("http://$<EXEC:/bin/sh -c 'exit 1'>/stats");
        assert!(expand(cfg).is_err());
    }

    #[test]
    fn exec_token_success_expands_normally() {
        let cfg = base_cfg("http://$<EXEC:printf 'web1\\nweb2\\n'>/stats");
        let expanded = expand(cfg).unwrap();
        assert_eq!(expanded.len(), 2);
    }
}
