// src/heuristics/catalog.rs

use crate::error::Result;
use regex::{Captures, Regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Qualitative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Hematology,
    Differential,
    Biochemistry,
    Electrolytes,
    Electrophoresis,
    Serology,
}

/// A lab field the extractor knows how to find.
#[derive(Debug)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    /// Polish and English spellings as they appear at the start of a line.
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub category: Category,
}

const fn numeric(
    key: &'static str,
    label: &'static str,
    aliases: &'static [&'static str],
    category: Category,
) -> FieldSpec {
    FieldSpec {
        key,
        label,
        aliases,
        kind: FieldKind::Numeric,
        category,
    }
}

const fn qualitative(key: &'static str, label: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        key,
        label,
        aliases,
        kind: FieldKind::Qualitative,
        category: Category::Serology,
    }
}

use Category::*;

// Order matters where aliases overlap: the more specific spelling goes first.
pub static FIELDS: &[FieldSpec] = &[
    // hematology
    numeric("wbc", "WBC", &["WBC", "Leukocyty", "White blood cells"], Hematology),
    numeric("rbc", "RBC", &["RBC", "Erytrocyty", "Red blood cells"], Hematology),
    numeric("hgb", "HGB", &["HGB", "Hemoglobina", "Hemoglobin"], Hematology),
    numeric("hct", "HCT", &["HCT", "Hematokryt", "Hematocrit"], Hematology),
    numeric("mcv", "MCV", &["MCV"], Hematology),
    numeric("mchc", "MCHC", &["MCHC"], Hematology),
    numeric("mch", "MCH", &["MCH"], Hematology),
    numeric("rdw", "RDW", &["RDW"], Hematology),
    numeric("plt", "PLT", &["PLT", "Płytki krwi", "Trombocyty", "Platelets"], Hematology),
    numeric("mpv", "MPV", &["MPV"], Hematology),
    numeric("retic", "Reticulocytes", &["RETIC", "Retikulocyty", "Reticulocytes"], Hematology),
    // differential, percentages first
    numeric("neu_pct", "NEU %", &["NEU%", "NEU %", "Neutrofile %", "Neutrophils %"], Differential),
    numeric("lym_pct", "LYM %", &["LYM%", "LYM %", "Limfocyty %", "Lymphocytes %"], Differential),
    numeric("mono_pct", "MONO %", &["MONO%", "MONO %", "Monocyty %", "Monocytes %"], Differential),
    numeric("eos_pct", "EOS %", &["EOS%", "EOS %", "Eozynofile %", "Eosinophils %"], Differential),
    numeric("baso_pct", "BASO %", &["BASO%", "BASO %", "Bazofile %", "Basophils %"], Differential),
    numeric("neu", "NEU", &["NEU", "Neutrofile", "Neutrophils"], Differential),
    numeric("lym", "LYM", &["LYM", "Limfocyty", "Lymphocytes"], Differential),
    numeric("mono", "MONO", &["MONO", "Monocyty", "Monocytes"], Differential),
    numeric("eos", "EOS", &["EOS", "Eozynofile", "Eosinophils"], Differential),
    numeric("baso", "BASO", &["BASO", "Bazofile", "Basophils"], Differential),
    numeric("band", "Band neutrophils", &["Pałeczkowate", "Band neutrophils", "Bands"], Differential),
    // biochemistry
    numeric("total_protein", "Total protein", &["Białko całkowite", "Total protein"], Biochemistry),
    numeric("albumin", "Albumin", &["Albumina", "Albuminy", "Albumin"], Biochemistry),
    numeric("ag_ratio", "A/G ratio", &["Stosunek albumin/globulin", "Stosunek A/G", "A/G ratio", "A/G"], Biochemistry),
    numeric("globulins", "Globulins", &["Globuliny", "Globulins", "Globulin"], Biochemistry),
    numeric("alt", "ALT", &["ALT", "AlAT"], Biochemistry),
    numeric("ast", "AST", &["AST", "AspAT"], Biochemistry),
    numeric("alp", "ALP", &["ALP", "Fosfataza zasadowa", "Alkaline phosphatase"], Biochemistry),
    numeric("ggt", "GGT", &["GGT", "GGTP"], Biochemistry),
    numeric("total_bilirubin", "Total bilirubin", &["Bilirubina całkowita", "Bilirubina", "Total bilirubin", "Bilirubin"], Biochemistry),
    numeric("urea", "Urea", &["Mocznik", "Urea", "BUN"], Biochemistry),
    numeric("creatinine", "Creatinine", &["Kreatynina", "Creatinine"], Biochemistry),
    numeric("sdma", "SDMA", &["SDMA"], Biochemistry),
    numeric("glucose", "Glucose", &["Glukoza", "Glucose"], Biochemistry),
    numeric("fructosamine", "Fructosamine", &["Fruktozamina", "Fructosamine"], Biochemistry),
    numeric("cholesterol", "Cholesterol", &["Cholesterol"], Biochemistry),
    numeric("triglycerides", "Triglycerides", &["Trójglicerydy", "Triglicerydy", "Triglycerides"], Biochemistry),
    numeric("amylase", "Amylase", &["Amylaza", "Amylase"], Biochemistry),
    numeric("lipase", "Lipase", &["Lipaza", "Lipase"], Biochemistry),
    numeric("ck", "CK", &["CK", "Kinaza kreatynowa", "Creatine kinase"], Biochemistry),
    numeric("ldh", "LDH", &["LDH"], Biochemistry),
    numeric("bile_acids", "Bile acids", &["Kwasy żółciowe", "Bile acids"], Biochemistry),
    numeric("saa", "SAA", &["SAA", "Amyloid A"], Biochemistry),
    numeric("t4", "T4", &["T4", "Tyroksyna", "Thyroxine"], Biochemistry),
    // electrolytes and minerals
    numeric("sodium", "Sodium", &["Sód", "Sodium", "Na"], Electrolytes),
    numeric("potassium", "Potassium", &["Potas", "Potassium", "K"], Electrolytes),
    numeric("chloride", "Chloride", &["Chlorki", "Chloride", "Cl"], Electrolytes),
    numeric("calcium", "Calcium", &["Wapń", "Calcium", "Ca"], Electrolytes),
    numeric("phosphorus", "Phosphorus", &["Fosfor", "Phosphorus", "P"], Electrolytes),
    numeric("magnesium", "Magnesium", &["Magnez", "Magnesium", "Mg"], Electrolytes),
    numeric("iron", "Iron", &["Żelazo", "Iron", "Fe"], Electrolytes),
    // serum protein electrophoresis
    numeric("ep_albumin", "Albumins (electrophoresis)", &["Albuminy %", "Albumin %", "Frakcja albuminowa", "Albumin fraction"], Electrophoresis),
    numeric("alpha1_globulins", "Alpha-1 globulins", &["Alfa-1-globuliny", "Alfa 1", "Alpha-1 globulins", "Alpha 1"], Electrophoresis),
    numeric("alpha2_globulins", "Alpha-2 globulins", &["Alfa-2-globuliny", "Alfa 2", "Alpha-2 globulins", "Alpha 2"], Electrophoresis),
    numeric("beta_globulins", "Beta globulins", &["Beta-globuliny", "Beta globulins", "Beta"], Electrophoresis),
    numeric("gamma_globulins", "Gamma globulins", &["Gamma-globuliny", "Gammaglobuliny", "Gamma globulins", "Gamma"], Electrophoresis),
    // serology
    qualitative("fcov_elisa", "FCoV ELISA", &["FCoV ELISA", "FCoV (ELISA)", "Koronawirus ELISA", "FCoV"]),
    qualitative("felv", "FeLV", &["FeLV"]),
    qualitative("fiv", "FIV", &["FIV"]),
];

pub fn lookup(key: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.key == key)
}

/// Map a test name from a report line to a catalog field.
pub fn match_name(name: &str) -> Option<&'static FieldSpec> {
    let lower = name.trim().to_lowercase();
    FIELDS
        .iter()
        .find(|f| f.aliases.iter().any(|a| a.to_lowercase() == lower))
}

/// Aliases this short (Na, K, P) must be followed by the value itself, a
/// `:`/`;`/`=` separator or a bracketed unit, never by free text.
const SHORT_ALIAS: usize = 2;

const VALUE: &str = r"[<>]?\d+(?:[.,]\d+)?";
const UNIT: &str = r"(?:x?10\^\d+/[lL]|[^\s\d;<>\-][^\s;]*)";
const RANGE: &str = r"\d+(?:[.,]\d+)?\s*-\s*\d+(?:[.,]\d+)?|[<>]\s*\d+(?:[.,]\d+)?";

fn alias_alternation(aliases: &[&str]) -> String {
    aliases
        .iter()
        .map(|a| {
            let escaped = regex::escape(a);
            if a.chars().last().is_some_and(char::is_alphanumeric) {
                format!(r"{escaped}\b")
            } else {
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Name part of a numeric pattern, up to where the value starts.
fn numeric_name_prefix(aliases: &[&str]) -> String {
    let (short, long): (Vec<&str>, Vec<&str>) = aliases
        .iter()
        .copied()
        .partition(|a| a.chars().count() <= SHORT_ALIAS);
    let mut branches = Vec::new();
    if !long.is_empty() {
        // the gap may not hold digits, so "Alfa 1" keeps its number
        branches.push(format!(r"(?:{})[^\d<>%\n]*?", alias_alternation(&long)));
    }
    if !short.is_empty() {
        branches.push(format!(
            r"(?:{})[+\-]?[ \t]*(?:[:;=][ \t]*|\([^)\n]*\)[ \t]*)?",
            alias_alternation(&short)
        ));
    }
    branches.join("|")
}

/// Line-anchored pattern for one field. Value, unit and range may be
/// separated by blanks or by the `;` of flattened table rows.
pub fn field_pattern(spec: &FieldSpec) -> String {
    match spec.kind {
        FieldKind::Numeric => {
            let prefix = numeric_name_prefix(spec.aliases);
            format!(
                r"(?mi)^[ \t]*(?:{prefix})(?P<value>{VALUE})[ \t;]*(?P<unit>{UNIT})?[ \t;]*(?P<range>{RANGE})?"
            )
        }
        FieldKind::Qualitative => {
            let names = alias_alternation(spec.aliases);
            format!(r"(?mi)^[ \t]*(?:{names})[ \t]*[:;]?[ \t]*(?P<text>[^\n;]+)")
        }
    }
}

/// The raw strings captured for one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMatch {
    pub value: Option<String>,
    pub unit: Option<String>,
    pub range: Option<String>,
    pub text: Option<String>,
}

impl FieldMatch {
    fn from_captures(caps: &Captures<'_>) -> Self {
        let get = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());
        Self {
            value: get("value"),
            unit: get("unit"),
            range: get("range"),
            text: get("text").filter(|t| !t.is_empty()),
        }
    }
}

/// Compiled catalog patterns.
pub struct FieldExtractor {
    fields: Vec<(&'static FieldSpec, Regex)>,
}

impl FieldExtractor {
    pub fn new() -> Result<Self> {
        let fields = FIELDS
            .iter()
            .map(|spec| Ok((spec, Regex::new(&field_pattern(spec))?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    /// First match of every catalog field, in catalog order.
    pub fn scan<'a>(&'a self, text: &'a str) -> impl Iterator<Item = (&'static FieldSpec, FieldMatch)> + 'a {
        self.fields.iter().filter_map(move |(spec, re)| {
            let caps = re.captures(text)?;
            Some((*spec, FieldMatch::from_captures(&caps)))
        })
    }

    /// Every match of one field, top to bottom.
    pub fn matches<'a>(&'a self, key: &'a str, text: &'a str) -> impl Iterator<Item = FieldMatch> + 'a {
        self.fields
            .iter()
            .filter(move |(spec, _)| spec.key == key)
            .flat_map(move |(_, re)| re.captures_iter(text).map(|caps| FieldMatch::from_captures(&caps)))
    }
}
