use super::catalog::match_name;
use super::{LabValue, PatientInfo, parse_number, parse_range};
use regex::Regex;

const WEEKS_PER_MONTH: f64 = 4.345;

// ---------------------------------------------------------------------------
// Patient metadata
// ---------------------------------------------------------------------------

/// Header labels, Polish and English, and the field each one fills.
const PATIENT_LABELS: &[(&str, &str)] = &[
    ("Pacjent", "name"),
    ("Patient", "name"),
    ("Gatunek", "species"),
    ("Species", "species"),
    ("Rasa", "breed"),
    ("Breed", "breed"),
    ("Płeć", "sex"),
    ("Sex", "sex"),
    ("Wiek", "age"),
    ("Age", "age"),
    ("Umaszczenie", "coat"),
    ("Coat", "coat"),
    ("Mikrochip", "microchip"),
    ("Microchip", "microchip"),
    ("Właściciel", "owner"),
    ("Owner", "owner"),
    ("Lecznica", "clinic"),
    ("Clinic", "clinic"),
    ("Lekarz", "vet"),
    ("Veterinarian", "vet"),
    ("Vet", "vet"),
];

pub fn extract_patient(text: &str) -> PatientInfo {
    let mut info = PatientInfo {
        collection_date: extract_collection_date(text),
        ..Default::default()
    };

    let labels = PATIENT_LABELS
        .iter()
        .map(|(label, _)| regex::escape(label))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(re) = Regex::new(&format!(r"\b({labels})\s*:")) else {
        return info;
    };

    for line in text.lines() {
        let matches: Vec<_> = re.captures_iter(line).collect();
        for (i, caps) in matches.iter().enumerate() {
            let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(line.len(), |m| m.start());
            let value = line[whole.end()..end].replace(';', "").trim().to_string();
            if value.is_empty() {
                continue;
            }
            let field = PATIENT_LABELS
                .iter()
                .find(|(l, _)| *l == label.as_str())
                .map(|(_, f)| *f);
            let slot = match field {
                Some("name") => &mut info.name,
                Some("species") => &mut info.species,
                Some("breed") => &mut info.breed,
                Some("sex") => &mut info.sex,
                Some("age") => &mut info.age,
                Some("coat") => &mut info.coat,
                Some("microchip") => &mut info.microchip,
                Some("owner") => &mut info.owner,
                Some("clinic") => &mut info.clinic,
                Some("vet") => &mut info.vet,
                _ => continue,
            };
            // the first occurrence wins; later pages repeat the header
            slot.get_or_insert(value);
        }
    }

    info.age_months = info.age.as_deref().and_then(parse_age_months);
    info
}

/// First sample collection date, `dd.mm.yyyy`.
fn extract_collection_date(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(?:Data pobrania materiału|Collection date)\s*:\s*(\d{2}\.\d{2}\.\d{4})").ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Age in months from wording such as "2 lata", "1 rok 3 miesiące",
/// "10 weeks" or "1,5 roku". A bare number is read as years.
pub fn parse_age_months(age: &str) -> Option<u32> {
    let re = Regex::new(r"(\d+(?:[.,]\d+)?)\s*(\p{L}[\p{L}\-]*)?").ok()?;
    let lower = age.to_lowercase();

    let mut months = 0.0;
    let mut found = false;
    for caps in re.captures_iter(&lower) {
        let n = parse_number(&caps[1])?;
        let unit = caps.get(2).map_or("", |m| m.as_str());
        months += if unit.starts_with('m') {
            n
        } else if unit.starts_with('t') || unit.starts_with('w') {
            n / WEEKS_PER_MONTH
        } else {
            // lat, lata, rok, roku, years, or no unit at all
            n * 12.0
        };
        found = true;
    }
    found.then_some(months.floor() as u32)
}

// ---------------------------------------------------------------------------
// Semicolon table rows: "name value; unit; min-max"
// ---------------------------------------------------------------------------

/// Parse table rows. A "Wynik" (result) row takes the name of the bare
/// test-name line preceding it.
pub fn parse_table_lines(text: &str) -> Vec<LabValue> {
    let Ok(parens) = Regex::new(r"\([^)]*\)") else {
        return Vec::new();
    };
    let Ok(name_value) = Regex::new(r"([^\d<>]+?)\s*([<>]?\d+(?:[,.]\d+)?)") else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    let mut last_test_name: Option<String> = None;

    for line in text.lines() {
        let cleaned = parens.replace_all(line, "");
        let cleaned = cleaned.trim();
        if cleaned.starts_with("Data ") {
            continue;
        }

        let parts: Vec<&str> = cleaned.split(';').map(str::trim).collect();
        if parts.len() == 1 {
            if !parts[0].is_empty() && !parts[0].chars().any(|c| c.is_ascii_digit()) {
                last_test_name = Some(parts[0].to_string());
            }
            continue;
        }
        if parts.len() < 3 {
            continue;
        }

        let Some(caps) = name_value.captures(parts[0]) else {
            continue;
        };
        let name = caps[1].trim();
        let raw = caps[2].to_string();
        let name = match (&last_test_name, name) {
            (Some(previous), "Wynik") => previous.clone(),
            _ => name.to_string(),
        };

        let (range_min, range_max) = parse_range(parts[2]);
        let key = match_name(&name).map_or_else(|| slug(&name), |spec| spec.key.to_string());
        rows.push(LabValue {
            key,
            value: parse_number(&raw),
            raw,
            unit: Some(parts[1].to_string()).filter(|u| !u.is_empty()),
            range_min,
            range_max,
            text: None,
            name,
        });
    }
    rows
}

/// Lowercase key with non-alphanumerics collapsed to `_`.
fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_header_split_on_labels() {
        let text = "Pacjent: Filemon; Gatunek: kot; Rasa: Maine Coon\nPłeć: samica Wiek: 8 miesięcy\nMikrochip: 616093900123456\n";
        let p = extract_patient(text);
        assert_eq!(p.name.as_deref(), Some("Filemon"));
        assert_eq!(p.species.as_deref(), Some("kot"));
        assert_eq!(p.breed.as_deref(), Some("Maine Coon"));
        assert_eq!(p.sex.as_deref(), Some("samica"));
        assert_eq!(p.age_months, Some(8));
        assert_eq!(p.microchip.as_deref(), Some("616093900123456"));
        assert!(p.owner.is_none());
    }

    #[test]
    fn test_english_header_and_date() {
        let text = "Patient: Tom Species: cat Age: 2 years\nOwner: J. Smith\nCollection date: 03.02.2025\n";
        let p = extract_patient(text);
        assert_eq!(p.name.as_deref(), Some("Tom"));
        assert_eq!(p.owner.as_deref(), Some("J. Smith"));
        assert_eq!(p.age_months, Some(24));
        assert_eq!(p.collection_date.as_deref(), Some("03.02.2025"));
    }

    #[test]
    fn test_first_collection_date_wins() {
        let text = "Data pobrania materiału: 01.02.2024\nData pobrania materiału: 05.02.2024\n";
        assert_eq!(extract_collection_date(text).as_deref(), Some("01.02.2024"));
    }

    #[test]
    fn test_age_wording() {
        assert_eq!(parse_age_months("1 rok 3 miesiące"), Some(15));
        assert_eq!(parse_age_months("2 lata"), Some(24));
        assert_eq!(parse_age_months("1,5 roku"), Some(18));
        assert_eq!(parse_age_months("10 weeks"), Some(2));
        assert_eq!(parse_age_months("6 m-cy"), Some(6));
        assert_eq!(parse_age_months("3"), Some(36));
        assert_eq!(parse_age_months("nieznany"), None);
    }

    #[test]
    fn test_table_rows_and_wynik() {
        let text = "\
Data wydruku; 10.03.2024; x
Kreatynina 2,45; mg/dl; 0,8-1,8
Kwas foliowy
Wynik 12,5; ng/ml; 9,7-21,6
Glukoza (surowica) 110,0; mg/dl; 70-150
";
        let rows = parse_table_lines(text);
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].key, "creatinine");
        assert_eq!(rows[0].value, Some(2.45));
        assert_eq!(rows[0].range_max, Some(1.8));
        assert!(rows[0].is_high());

        assert_eq!(rows[1].name, "Kwas foliowy");
        assert_eq!(rows[1].key, "kwas_foliowy");
        assert_eq!(rows[1].unit.as_deref(), Some("ng/ml"));

        assert_eq!(rows[2].key, "glucose");
        assert_eq!(rows[2].range_min, Some(70.0));
    }
}
