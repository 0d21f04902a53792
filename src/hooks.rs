//! Loads hook definitions and applies them to the bundle text.
//!
//! A hook is a data-described patch: a set of named substitutions resolved against the
//! live bundle, plus an ordered list of literal find/replace operations that may embed
//! those names. Hooks apply atomically; a hook that fails partway leaves no trace.

use std::{
    ffi::OsStr,
    fs::File,
    path::{Path, PathBuf},
};

use log::{info, warn};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::bundle::{self, Section, SectionTable};

/// A named search: `find` is located in the bundle and the result is bound to `name` for
/// use in replacement text.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedFind {
    pub find: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Substitutions {
    /// Substring searches over section bodies; each binds its name to a section id.
    #[serde(rename = "sectionIdFind")]
    pub section_id_find: Vec<NamedFind>,

    /// Regex searches over the whole bundle; each binds its name to the first match's
    /// first capture group.
    pub direct: Vec<NamedFind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replacement {
    /// Identifies the target section: an exact section id, or a fragment of the
    /// section's body.
    #[serde(rename = "sectionID")]
    pub section_id: String,

    pub find: String,
    pub replace: String,
}

/// One hook definition, as deserialized from its JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookSpec {
    pub substitutions: Substitutions,
    pub replacements: Vec<Replacement>,
}

/// A hook definition along with the name it is reported under (its file stem).
#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub spec: HookSpec,
}

/// The reasons a single hook can fail to apply. None of these stop the overall run;
/// the hook is skipped and the bundle text is left as it was before the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("substitution entry is missing its find text or its name")]
    IncompleteSubstitution,

    #[error("no section body contains {fragment:?}")]
    SectionSearchUnmatched { fragment: String },

    #[error("{pattern:?} is not a valid pattern")]
    BadPattern { pattern: String },

    #[error("pattern {pattern:?} needs a capturing group for its value")]
    NoCaptureGroup { pattern: String },

    #[error("pattern {pattern:?} matched nothing in the bundle")]
    PatternUnmatched { pattern: String },

    #[error("no section matches {marker:?}")]
    SectionNotFound { marker: String },

    #[error("section {id} has no alias in the target section")]
    AliasNotFound { id: String },

    #[error("find text {find:?} does not occur in the bundle")]
    FindTextMissing { find: String },
}

/// A resolved substitution value: either the id of a section located by content, or a
/// literal fragment captured straight out of the bundle text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    SectionId(String),
    Literal(String),
}

/// Name-to-value table for one hook application. Registration order is kept so that
/// token expansion walks it deterministically; re-registering a name replaces the old
/// entry outright.
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: Vec<(String, Binding)>,
}

impl BindingTable {
    fn insert(&mut self, name: &str, value: Binding) {
        match self.bindings.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.bindings.push((name.to_string(), value)),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    #[cfg(test)]
    fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

/// Resolves a hook's named substitutions against the current bundle snapshot.
///
/// `sectionIdFind` entries resolve first, then `direct` entries; a name used by both
/// ends up with the direct value.
pub fn resolve_bindings(
    spec: &HookSpec,
    bundle_text: &str,
    sections: &SectionTable,
) -> Result<BindingTable, HookError> {
    let mut bindings = BindingTable::default();

    for entry in &spec.substitutions.section_id_find {
        if entry.find.is_empty() || entry.name.is_empty() {
            return Err(HookError::IncompleteSubstitution);
        }

        let section = sections
            .iter()
            .find(|section| section.body.contains(&entry.find))
            .ok_or_else(|| HookError::SectionSearchUnmatched {
                fragment: entry.find.clone(),
            })?;

        bindings.insert(&entry.name, Binding::SectionId(section.id.clone()));
    }

    for entry in &spec.substitutions.direct {
        if entry.find.is_empty() || entry.name.is_empty() {
            return Err(HookError::IncompleteSubstitution);
        }

        let pattern = Regex::new(&entry.find).map_err(|_| HookError::BadPattern {
            pattern: entry.find.clone(),
        })?;

        let captures =
            pattern
                .captures(bundle_text)
                .ok_or_else(|| HookError::PatternUnmatched {
                    pattern: entry.find.clone(),
                })?;

        let value = captures.get(1).ok_or_else(|| HookError::NoCaptureGroup {
            pattern: entry.find.clone(),
        })?;

        bindings.insert(&entry.name, Binding::Literal(value.as_str().to_string()));
    }

    Ok(bindings)
}

/// An exact id match wins; otherwise the marker is searched for in section bodies,
/// earliest section first.
fn find_target_section<'t>(
    sections: &'t SectionTable,
    marker: &str,
) -> Result<&'t Section, HookError> {
    sections
        .iter()
        .find(|section| section.id == marker)
        .or_else(|| sections.iter().find(|section| section.body.contains(marker)))
        .ok_or_else(|| HookError::SectionNotFound {
            marker: marker.to_string(),
        })
}

/// Expands every bound name appearing in the entry's find/replace text.
///
/// An id binding can't be spliced in directly: the target section refers to that section
/// through its own short alias, so the id goes through alias resolution against the
/// target's body. Literal bindings are spliced in as captured.
fn expand_tokens(
    replacement: &Replacement,
    target_body: &str,
    bindings: &BindingTable,
) -> Result<(String, String), HookError> {
    let mut find = replacement.find.clone();
    let mut replace = replacement.replace.clone();

    for (name, value) in bindings.iter() {
        if !find.contains(name) && !replace.contains(name) {
            continue;
        }

        let expansion = match value {
            Binding::SectionId(id) => bundle::resolve_alias(target_body, id)
                .ok_or_else(|| HookError::AliasNotFound { id: id.clone() })?,
            Binding::Literal(text) => text.clone(),
        };

        find = find.replace(name, &expansion);
        replace = replace.replace(name, &expansion);
    }

    Ok((find, replace))
}

/// Runs the hook's replacements in order against a copy of the bundle text.
///
/// Each replacement sees the previous one's output. Every expanded find text replaces
/// all of its occurrences across the whole text, not just within the target section.
/// Handing back the error instead of the copy is what makes a failed hook invisible to
/// the caller.
pub fn apply_replacements(
    replacements: &[Replacement],
    bundle_text: &str,
    sections: &SectionTable,
    bindings: &BindingTable,
) -> Result<String, HookError> {
    let mut text = bundle_text.to_string();

    for replacement in replacements {
        let target = find_target_section(sections, &replacement.section_id)?;
        let (find, replace) = expand_tokens(replacement, &target.body, bindings)?;

        if !text.contains(&find) {
            return Err(HookError::FindTextMissing { find });
        }

        text = text.replace(&find, &replace);
    }

    Ok(text)
}

/// Applies a single hook to the bundle text, returning the fully mutated text.
pub fn apply_hook(
    spec: &HookSpec,
    bundle_text: &str,
    sections: &SectionTable,
) -> Result<String, HookError> {
    let bindings = resolve_bindings(spec, bundle_text, sections)?;
    apply_replacements(&spec.replacements, bundle_text, sections, &bindings)
}

/// The outcome of running every known hook over a bundle snapshot.
#[derive(Debug)]
pub struct ApplyReport {
    pub text: String,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Folds the hooks, in order, over the bundle text. Each successful hook's output is the
/// next hook's input, so ordering is observable: a later hook may depend on text an
/// earlier one introduced.
pub fn apply_all(hooks: &[Hook], bundle_text: String) -> ApplyReport {
    let mut report = ApplyReport {
        text: bundle_text,
        applied: Vec::new(),
        skipped: Vec::new(),
    };

    for hook in hooks {
        // The previous hook may have rewritten section text, so the table is rebuilt
        // from each snapshot.
        let sections = bundle::extract_sections(&report.text);

        match apply_hook(&hook.spec, &report.text, &sections) {
            Ok(text) => {
                info!("applied hook '{}'", hook.name);
                report.text = text;
                report.applied.push(hook.name.clone());
            }
            Err(err) => {
                warn!("hook '{}' did not apply: {}", hook.name, err);
                report.skipped.push(hook.name.clone());
            }
        }
    }

    report
}

fn load_hook(path: &Path) -> eyre::Result<Hook> {
    let name = path
        .file_stem()
        .and_then(OsStr::to_str)
        .ok_or_else(|| eyre::eyre!("hook file needs a UTF-8 name"))?
        .to_string();

    let spec: HookSpec = serde_json::from_reader(File::open(path)?)?;

    Ok(Hook { name, spec })
}

/// Loads every `*.json` hook definition in the directory, in filename order so that hook
/// application order is deterministic. Files that fail to load are skipped with a
/// warning; only an unreadable directory is an error.
pub fn load_all(dir: &Path) -> std::io::Result<Vec<Hook>> {
    info!("loading hooks from {:?}", dir);

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| Some(entry.ok()?.path()))
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();

    paths.sort();

    let mut hooks = Vec::new();

    for path in paths {
        match load_hook(&path) {
            Ok(hook) => {
                info!("loaded hook '{}'", hook.name);
                hooks.push(hook);
            }
            Err(err) => warn!("unable to load {:?}: {:?}", path, err),
        }
    }

    Ok(hooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = concat!(
        "(()=>{var e,t={",
        "10:(e,t,n)=>{var ab=n(42);ab.greet()},",
        "42:e=>{e.exports=spacingDetails}",
        "},n={};function f(){}})()"
    );

    fn sections_of(text: &str) -> SectionTable {
        bundle::extract_sections(text)
    }

    fn section_find(find: &str, name: &str) -> NamedFind {
        NamedFind {
            find: find.to_string(),
            name: name.to_string(),
        }
    }

    fn replacement(section_id: &str, find: &str, replace: &str) -> Replacement {
        Replacement {
            section_id: section_id.to_string(),
            find: find.to_string(),
            replace: replace.to_string(),
        }
    }

    #[test]
    fn parses_the_external_json_shape() {
        let json = r#"{
            "substitutions": {
                "sectionIdFind": [ { "find": "spacingDetails", "name": "$T" } ],
                "direct": [ { "find": "var (ab)=", "name": "$A" } ]
            },
            "replacements": [
                { "sectionID": "10", "find": "greet", "replace": "wave" }
            ]
        }"#;

        let spec: HookSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.substitutions.section_id_find.len(), 1);
        assert_eq!(spec.substitutions.direct.len(), 1);
        assert_eq!(spec.replacements[0].section_id, "10");
    }

    #[test]
    fn missing_substitution_lists_default_to_empty() {
        let spec: HookSpec =
            serde_json::from_str(r#"{ "replacements": [] }"#).unwrap();
        assert!(spec.substitutions.section_id_find.is_empty());
        assert!(spec.substitutions.direct.is_empty());
    }

    #[test]
    fn section_search_binds_first_matching_section_id() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("e.exports", "$T")],
                direct: vec![],
            },
            replacements: vec![],
        };

        let bindings = resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert_eq!(bindings.get("$T"), Some(&Binding::SectionId("42".into())));
    }

    #[test]
    fn unmatched_section_search_fails_the_hook() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("nowhere to be found", "$T")],
                direct: vec![],
            },
            replacements: vec![],
        };

        assert_eq!(
            resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap_err(),
            HookError::SectionSearchUnmatched {
                fragment: "nowhere to be found".into()
            }
        );
    }

    #[test]
    fn direct_pattern_binds_first_capture_group() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![],
                direct: vec![section_find(r"var ([a-z]+)=n\(42\)", "$A")],
            },
            replacements: vec![],
        };

        let bindings = resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert_eq!(bindings.get("$A"), Some(&Binding::Literal("ab".into())));
    }

    #[test]
    fn unmatched_direct_pattern_fails_the_hook() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![],
                direct: vec![section_find(r"class ([A-Z]\w+) extends", "$C")],
            },
            replacements: vec![],
        };

        assert!(matches!(
            resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)),
            Err(HookError::PatternUnmatched { .. })
        ));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("", "$T")],
                direct: vec![],
            },
            replacements: vec![],
        };

        assert_eq!(
            resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap_err(),
            HookError::IncompleteSubstitution
        );
    }

    #[test]
    fn reused_name_ends_up_with_the_direct_value() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("e.exports", "$X")],
                direct: vec![section_find(r"var ([a-z]+)=n\(42\)", "$X")],
            },
            replacements: vec![],
        };

        let bindings = resolve_bindings(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert_eq!(bindings.get("$X"), Some(&Binding::Literal("ab".into())));
    }

    // The worked end-to-end case: find the dependency's id by content, then patch a call
    // in the section that uses it, addressing that section by id.
    #[test]
    fn applies_a_hook_with_alias_expansion() {
        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("e.exports", "$T")],
                direct: vec![],
            },
            replacements: vec![replacement("10", "$T.greet()", "$T.greet(),$T.wave()")],
        };

        let patched = apply_hook(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert!(patched.contains("ab.greet(),ab.wave()"));
    }

    // A bound name the replacement never mentions costs nothing: no alias lookup runs
    // for it, and the replacement is a plain whole-text substitution.
    #[test]
    fn unused_bindings_are_ignored() {
        let text = "(()=>{var e,t={1:(e,t)=>{var x=n(2)},2:e=>{}},n={};function f(){}})()";

        let spec = HookSpec {
            substitutions: Substitutions {
                section_id_find: vec![section_find("n(2)", "$T")],
                direct: vec![],
            },
            replacements: vec![replacement("1", "x", "x+1")],
        };

        let patched = apply_hook(&spec, text, &sections_of(text)).unwrap();
        assert!(patched.contains("var x+1=n(2)"));
    }

    #[test]
    fn marker_can_be_a_body_fragment() {
        let spec = HookSpec {
            substitutions: Substitutions::default(),
            replacements: vec![replacement("spacingDetails", "e.exports", "e.exports2")],
        };

        let patched = apply_hook(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert!(patched.contains("e.exports2=spacingDetails"));
    }

    #[test]
    fn replacement_covers_every_occurrence_in_the_whole_text() {
        let spec = HookSpec {
            substitutions: Substitutions::default(),
            replacements: vec![replacement("10", "ab", "zz")],
        };

        let patched = apply_hook(&spec, BUNDLE, &sections_of(BUNDLE)).unwrap();
        assert!(patched.contains("var zz=n(42);zz.greet()"));
        assert!(!patched.contains("ab"));
    }

    #[test]
    fn unknown_marker_fails_the_hook() {
        let spec = HookSpec {
            substitutions: Substitutions::default(),
            replacements: vec![replacement("31337", "ab", "zz")],
        };

        assert_eq!(
            apply_hook(&spec, BUNDLE, &sections_of(BUNDLE)),
            Err(HookError::SectionNotFound {
                marker: "31337".into()
            })
        );
    }

    #[test]
    fn absent_find_text_fails_the_hook() {
        let spec = HookSpec {
            substitutions: Substitutions::default(),
            replacements: vec![replacement("10", "not in there", "whatever")],
        };

        assert!(matches!(
            apply_hook(&spec, BUNDLE, &sections_of(BUNDLE)),
            Err(HookError::FindTextMissing { .. })
        ));
    }

    // A failing second replacement must leave no trace of the successful first one.
    #[test]
    fn failed_hook_leaves_the_callers_text_untouched() {
        let spec = HookSpec {
            substitutions: Substitutions::default(),
            replacements: vec![
                replacement("10", "greet", "wave"),
                replacement("no such section", "x", "y"),
            ],
        };

        let hooks = [Hook {
            name: "broken".into(),
            spec,
        }];

        let report = apply_all(&hooks, BUNDLE.to_string());
        assert_eq!(report.text, BUNDLE);
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, ["broken"]);
    }

    #[test]
    fn hooks_compose_in_order_only() {
        let first = Hook {
            name: "first".into(),
            spec: HookSpec {
                substitutions: Substitutions::default(),
                replacements: vec![replacement("10", "greet", "salute")],
            },
        };

        let second = Hook {
            name: "second".into(),
            spec: HookSpec {
                substitutions: Substitutions::default(),
                // "salute" only exists once `first` has run.
                replacements: vec![replacement("10", "salute", "salute twice")],
            },
        };

        let report = apply_all(&[first.clone(), second.clone()], BUNDLE.to_string());
        assert_eq!(report.applied, ["first", "second"]);
        assert!(report.text.contains("salute twice"));

        let report = apply_all(&[second, first], BUNDLE.to_string());
        assert_eq!(report.applied, ["first"]);
        assert_eq!(report.skipped, ["second"]);
    }

    #[test]
    fn loads_json_hooks_and_skips_everything_else() {
        let dir = tempfile::tempdir().unwrap();

        let valid = r#"{ "replacements": [ { "sectionID": "1", "find": "a", "replace": "b" } ] }"#;
        std::fs::write(dir.path().join("b_tweak.json"), valid).unwrap();
        std::fs::write(dir.path().join("a_tweak.json"), valid).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let hooks = load_all(dir.path()).unwrap();
        let names: Vec<_> = hooks.iter().map(|hook| hook.name.as_str()).collect();

        assert_eq!(names, ["a_tweak", "b_tweak"]);
    }

    #[test]
    fn unreadable_directory_is_an_error() {
        assert!(load_all(Path::new("/definitely/not/a/real/dir")).is_err());
    }
}
