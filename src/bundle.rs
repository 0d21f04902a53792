//! Splits the interface bundle's function table into addressable numbered sections, and
//! resolves the short local aliases a section's code uses to refer to other sections.

use once_cell::sync::Lazy;
use regex::Regex;

/// Text that opens the bundle's function table. Everything before it is loader boilerplate.
const TABLE_START: &str = "(()=>{var e,t={";

/// Text that follows the function table. Everything from here on is the loader itself.
const TABLE_END: &str = "},n={};function";

/// One numbered entry from the bundle's function table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// The numeric key the bundle uses for this section.
    pub id: String,

    /// The section's source text, verbatim.
    pub body: String,
}

/// The bundle's function table, in first-appearance order.
///
/// Order is part of the contract: searches that could match several sections must
/// resolve to the earliest one, so this stays a plain vector rather than a map.
#[derive(Debug, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Returns the body of the section with the given id, if the table has one.
    pub fn body_of(&self, id: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|section| section.id == id)
            .map(|section| section.body.as_str())
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Matches the start of a section entry: a 1-6 digit id, preceded by the table start or
/// the previous entry's trailing comma, followed by a body beginning with `(` or `e`.
static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|,)(\d{1,6}):([(e])").unwrap());

/// Parses the function table out of the bundle text.
///
/// This is a positional scan, not a grammar-aware parse: a body runs from its opening
/// `(`/`e` up to (not including) the next header's comma, so a function body containing
/// its own unescaped `,<digits>:(` sequence would be misread as a new section. The
/// bundler doesn't emit that shape, and we tolerate the theoretical case rather than
/// ship a JavaScript parser.
///
/// A bundle missing either marker produces an empty table, not an error; the caller's
/// "no hooks applied" check is what surfaces that situation.
pub fn extract_sections(bundle_text: &str) -> SectionTable {
    let table = match bundle_text
        .split_once(TABLE_START)
        .and_then(|(_, rest)| rest.split_once(TABLE_END))
    {
        Some((table, _)) => table,
        None => return SectionTable::default(),
    };

    // Find every header up front; each body then runs to the start of the next header.
    // The boundary is lookahead only: the comma belongs to the next entry, not to the
    // body it terminates.
    let headers: Vec<(&str, usize, usize)> = SECTION_HEADER
        .captures_iter(table)
        .map(|caps| {
            let id = caps.get(1).unwrap();
            let body_start = caps.get(2).unwrap().start();
            (id.as_str(), body_start, caps.get(0).unwrap().start())
        })
        .collect();

    let mut sections: Vec<Section> = Vec::with_capacity(headers.len());

    for (index, (id, body_start, _)) in headers.iter().enumerate() {
        let body_end = headers
            .get(index + 1)
            .map(|(_, _, next_header)| *next_header)
            .unwrap_or(table.len());

        let body = table[*body_start..body_end].to_string();

        // Duplicate ids shouldn't happen, but if one does the later body wins while the
        // entry keeps its original position.
        match sections.iter_mut().find(|section| section.id == *id) {
            Some(existing) => existing.body = body,
            None => sections.push(Section {
                id: (*id).to_string(),
                body,
            }),
        }
    }

    SectionTable { sections }
}

/// Finds the local variable a section's body binds to another section's id.
///
/// The bundle's loader assigns these with calls like `var le=n(91762)` or `,le=n(91762)`.
/// Hook authors write their patches in terms of stable section ids, but the text being
/// rewritten uses whatever short name the minifier picked at that call site; this is the
/// bridge between the two.
pub fn resolve_alias(section_body: &str, section_id: &str) -> Option<String> {
    // The id must not continue into a longer number: `=n(42` is no use when we're
    // looking for section 4.
    let pattern = format!(
        r"(?:,|var )([A-Za-z_$][A-Za-z0-9_$]*)=n\({}(?:[^0-9]|$)",
        regex::escape(section_id)
    );

    let alias = Regex::new(&pattern)
        .ok()?
        .captures(section_body)?
        .get(1)
        .unwrap()
        .as_str();

    Some(alias.to_string())
}
