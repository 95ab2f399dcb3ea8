//! Name-variant derivation.
//!
//! Two consumers: the index builder derives the extra lookup keys a place
//! should be reachable by (`derive_names`, `locational_barename`), and the
//! scrubber derives last-resort alternates for a query token that failed to
//! match as written (`query_alternates`).

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::clean_nonalpha;

/// Countries whose populated places get Township/City/Village suffix aliases.
pub const SUFFIX_COUNTRIES: &[&str] = &["US", "CA", "AU"];

/// Countries whose "X on Y" / "X by the Y" places get barename aliases.
pub const LOCATIONAL_COUNTRIES: &[&str] = &["US", "GB", "IE", "AU", "NZ", "ZA"];

/// Barenames that are too generic to stand alone as an alias.
const BARENAME_BLACKLIST: &[&str] = &[
    "lake", "lakes", "village", "pines", "reserve", "the park", "city", "come",
];

static SAINT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^saint\s+").unwrap());
static ST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^st\s+").unwrap());
static MOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^mount\s+").unwrap());
static MT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^mt\s+").unwrap());
static XOY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+o['’]\s+").unwrap());
static O_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^o['’]\s+").unwrap());
static MC_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(Mc)\s+").unwrap());
static O_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(O)\s+").unwrap());
static SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(city|township|twp|village)\s*$").unwrap());
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s*\(([^)]+)\)\s*$").unwrap());
static LOCATIONAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+?)[\s-](?:on|by)[\s-](?:the[\s-])?\S").unwrap());

static JP_KEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-][Kk]en$").unwrap());
static JP_FU_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-][Ff]u$").unwrap());
static JP_SHI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-][Ss]hi$").unwrap());
static JP_KU_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-][Kk]u$").unwrap());
static JA_SHI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"市$").unwrap());
static RU_OBLAST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[\s-]oblast['’]?$").unwrap());
static RU_KRAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)[\s-]kra[iy]$").unwrap());
static IE_COUNTY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^county\s+").unwrap());

/// A derived alias together with the language it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    pub text: String,
    pub lang: &'static str,
}

impl Derived {
    fn en(text: impl Into<String>) -> Self {
        Derived {
            text: text.into(),
            lang: "en",
        }
    }
}

/// Everything the builder should also index a place under, beyond its
/// regular names. `populated` gates the suffix rules that only make sense
/// for cities; `speaks_english` comes from the country record.
pub fn derive_names(
    country_code: &str,
    name: &str,
    asciiname: &str,
    known_names: &[String],
    populated: bool,
    speaks_english: bool,
) -> Vec<Derived> {
    let mut out = Vec::new();

    if speaks_english {
        english_variants(name, asciiname, known_names, &mut out);
    }

    match country_code {
        "JP" => jp_variants(name, asciiname, &mut out),
        "RU" => ru_variants(name, &mut out),
        "IE" => ie_variants(name, &mut out),
        _ => {}
    }

    if populated && SUFFIX_COUNTRIES.contains(&country_code) {
        suffix_variants(name, &mut out);
    }

    if let Some(caps) = BRACKET_RE.captures(name) {
        out.push(Derived::en(caps[1].to_lowercase()));
    }

    let collapsed = MC_SPACE_RE.replace_all(name, "${1}");
    let collapsed = O_SPACE_RE.replace_all(&collapsed, "${1}'");
    if collapsed != name {
        out.push(Derived::en(collapsed.to_lowercase()));
    }

    out
}

fn english_variants(name: &str, asciiname: &str, known_names: &[String], out: &mut Vec<Derived>) {
    // Hyphenated names always get space-separated variants.
    out.push(Derived::en(name.to_lowercase().replace('-', " ")));
    if asciiname != name {
        out.push(Derived::en(asciiname.to_lowercase().replace('-', " ")));
    }

    let mut derive_from: Vec<String> = vec![name.to_lowercase(), asciiname.to_lowercase()];
    derive_from.extend(known_names.iter().map(|n| n.to_lowercase()));
    derive_from.sort();
    derive_from.dedup();

    for (from, to) in [(&SAINT_RE, "st "), (&ST_RE, "saint "), (&MOUNT_RE, "mt "), (&MT_RE, "mount ")]
    {
        if from.is_match(name) {
            out.extend(
                derive_from
                    .iter()
                    .filter(|n| from.is_match(n))
                    .map(|n| Derived::en(from.replace(n, to).into_owned())),
            );
        }
    }

    // X O' Y names get stripped and spelled-out variants.
    if XOY_RE.is_match(name) {
        for repl in [" o' ", " o ", " of "] {
            out.extend(
                derive_from
                    .iter()
                    .map(|n| Derived::en(XOY_RE.replace_all(n, repl).into_owned())),
            );
        }
    }

    // Leading O' gets the space removed.
    if O_PREFIX_RE.is_match(name) {
        out.extend(
            derive_from
                .iter()
                .map(|n| Derived::en(O_PREFIX_RE.replace(n, "o'").into_owned())),
        );
    }
}

fn suffix_variants(name: &str, out: &mut Vec<Derived>) {
    let Some(caps) = SUFFIX_RE.captures(name) else {
        return;
    };
    let suffix = caps[1].to_lowercase();
    let base = name[..caps.get(0).unwrap().start()].to_string();
    if BARENAME_BLACKLIST.contains(&base.to_lowercase().as_str()) {
        return;
    }
    out.push(Derived::en(base.to_lowercase()));
    if suffix == "township" || suffix == "twp" {
        out.push(Derived::en(format!("{} city", base.to_lowercase())));
    } else {
        out.push(Derived::en(format!("{} township", base.to_lowercase())));
    }
}

fn jp_variants(name: &str, asciiname: &str, out: &mut Vec<Derived>) {
    if JP_FU_RE.is_match(asciiname) {
        let bare = JP_FU_RE.replace(asciiname, "").to_lowercase();
        out.push(Derived::en(format!("{bare} prefecture")));
        out.push(Derived::en(format!("{bare} pref")));
        out.push(Derived::en(bare));
    } else if JP_KEN_RE.is_match(asciiname) {
        let bare = JP_KEN_RE.replace(asciiname, "").to_lowercase();
        out.push(Derived::en(format!("{bare} prefecture")));
        out.push(Derived::en(format!("{bare} pref")));
        out.push(Derived::en(format!("{bare} ken")));
        out.push(Derived::en(bare));
    } else if JP_SHI_RE.is_match(name) {
        let bare = JP_SHI_RE.replace(name, "").to_lowercase();
        out.push(Derived::en(format!("{bare} city")));
        out.push(Derived::en(bare));
    } else if JP_KU_RE.is_match(name) {
        let bare = JP_KU_RE.replace(name, "").to_lowercase();
        out.push(Derived::en(format!("{bare} ku")));
        out.push(Derived::en(format!("{bare} ward")));
        out.push(Derived::en(bare));
    }

    if JA_SHI_RE.is_match(name) {
        out.push(Derived {
            text: JA_SHI_RE.replace(name, "").into_owned(),
            lang: "ja",
        });
    }
}

fn ru_variants(name: &str, out: &mut Vec<Derived>) {
    for (re, kind) in [(&RU_OBLAST_RE, "oblast"), (&RU_KRAY_RE, "kray")] {
        if re.is_match(name) {
            let bare = re.replace(name, "").trim().to_lowercase();
            out.push(Derived::en(format!("{bare} {kind}")));
            out.push(Derived::en(format!("{bare} region")));
            out.push(Derived::en(format!("{bare} reg")));
            out.push(Derived::en(bare));
            return;
        }
    }
}

fn ie_variants(name: &str, out: &mut Vec<Derived>) {
    if IE_COUNTY_RE.is_match(name) {
        let bare = IE_COUNTY_RE.replace(name, "").to_lowercase();
        out.push(Derived::en(format!("co {bare}")));
        out.push(Derived::en(format!("county {bare}")));
    }
}

/// Barename for "X on Y" / "X by (the) Y" place names, or None when the
/// pattern doesn't apply or the barename is too generic. The builder must
/// still reject the result when another city in the same `(countryCode,
/// admin1)` already claims it.
pub fn locational_barename(name: &str) -> Option<String> {
    if name.ends_with("Park") {
        return None;
    }
    let caps = LOCATIONAL_RE.captures(name)?;
    let bare = caps[1].to_string();
    if BARENAME_BLACKLIST.contains(&bare.to_lowercase().as_str()) {
        return None;
    }
    Some(bare)
}

/// Clean up a raw city query token and derive the alternates the scrubber
/// falls back to when the token fails to match as written. Returns the
/// cleaned token plus alternates in try-order; all still need normalizing.
pub fn query_alternates(city: &str) -> (String, Vec<String>) {
    let mut alternates = Vec::new();

    if let Some(caps) = BRACKET_RE.captures(city) {
        let inner = clean_nonalpha(&caps[2]);
        if !inner.is_empty() {
            alternates.push(inner.to_string());
        }
        alternates.push(caps[1].to_string());
    }

    // D&B-style prefixes that shouldn't be space-separated.
    let city = MC_SPACE_RE.replace_all(city, "${1}").into_owned();
    let city = O_SPACE_RE.replace_all(&city, "${1}'").into_owned();

    if let Some(caps) = SUFFIX_RE.captures(&city) {
        let suffix = caps[1].to_lowercase();
        let base = city[..caps.get(0).unwrap().start()].to_string();
        alternates.push(base.clone());
        if suffix == "township" || suffix == "twp" {
            alternates.push(format!("{base} City"));
        } else {
            alternates.push(format!("{base} Township"));
        }
    }

    (city, alternates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(derived: &[Derived]) -> Vec<&str> {
        derived.iter().map(|d| d.text.as_str()).collect()
    }

    #[test]
    fn saint_and_st_variants() {
        let d = derive_names("US", "Saint Francis", "Saint Francis", &[], true, true);
        assert!(texts(&d).contains(&"st francis"));

        let d = derive_names("US", "St Cloud", "St Cloud", &[], true, true);
        assert!(texts(&d).contains(&"saint cloud"));
    }

    #[test]
    fn mount_variants() {
        let d = derive_names("AU", "Mount Isa", "Mount Isa", &[], true, true);
        assert!(texts(&d).contains(&"mt isa"));
    }

    #[test]
    fn suffix_variants_for_populated_places() {
        let d = derive_names("US", "Oak Park Township", "Oak Park Township", &[], true, true);
        let t = texts(&d);
        assert!(t.contains(&"oak park"));
        assert!(t.contains(&"oak park city"));

        // blacklisted barenames stay suffixed
        let d = derive_names("US", "Lake Village", "Lake Village", &[], true, true);
        assert!(!texts(&d).contains(&"lake"));

        // not populated, not eligible
        let d = derive_names("US", "Coal City", "Coal City", &[], false, true);
        assert!(!texts(&d).contains(&"coal"));
    }

    #[test]
    fn bracketed_suffix() {
        let d = derive_names("MX", "Monterrey (Nuevo León)", "Monterrey (Nuevo Leon)", &[], true, false);
        assert!(texts(&d).contains(&"monterrey"));
    }

    #[test]
    fn o_apostrophe_variants() {
        let d = derive_names("US", "Land O' Lakes", "Land O' Lakes", &[], true, true);
        let t = texts(&d);
        assert!(t.contains(&"land o lakes"));
        assert!(t.contains(&"land of lakes"));
    }

    #[test]
    fn jp_ward_and_city_suffixes() {
        let d = derive_names("JP", "Minato-ku", "Minato-ku", &[], false, false);
        let t = texts(&d);
        assert!(t.contains(&"minato"));
        assert!(t.contains(&"minato ward"));

        let d = derive_names("JP", "札幌市", "Sapporo-shi", &[], true, false);
        assert!(d.iter().any(|x| x.lang == "ja" && x.text == "札幌"));
    }

    #[test]
    fn ru_oblast_suffixes() {
        let d = derive_names("RU", "Voronezhskaya Oblast’", "Voronezhskaya Oblast", &[], false, false);
        let t = texts(&d);
        assert!(t.contains(&"voronezhskaya"));
        assert!(t.contains(&"voronezhskaya region"));
    }

    #[test]
    fn ie_county_prefix() {
        let d = derive_names("IE", "County Cork", "County Cork", &[], false, true);
        let t = texts(&d);
        assert!(t.contains(&"co cork"));
        assert!(t.contains(&"county cork"));
    }

    #[test]
    fn locational_barenames() {
        assert_eq!(locational_barename("Sydney"), None);
        assert_eq!(locational_barename("Sydney on Vaal").as_deref(), Some("Sydney"));
        assert_eq!(locational_barename("Sunrise-on-Sea").as_deref(), Some("Sunrise"));
        assert_eq!(locational_barename("Kenton on Sea").as_deref(), Some("Kenton"));
        assert_eq!(locational_barename("Henley on Klip").as_deref(), Some("Henley"));
        assert_eq!(
            locational_barename("Cardiff-by-the-Sea").as_deref(),
            Some("Cardiff")
        );
        assert_eq!(locational_barename("Village on the Green"), None);
        assert_eq!(locational_barename("Mentor-on-the-Lake Park"), None);
    }

    #[test]
    fn query_alternates_suffixes() {
        let (city, alts) = query_alternates("Clinton Township");
        assert_eq!(city, "Clinton Township");
        assert_eq!(alts, vec!["Clinton".to_string(), "Clinton City".to_string()]);

        let (city, alts) = query_alternates("Coal City");
        assert_eq!(city, "Coal City");
        assert_eq!(alts, vec!["Coal".to_string(), "Coal Township".to_string()]);
    }

    #[test]
    fn query_alternates_prefix_cleanup() {
        let (city, _) = query_alternates("Mc Donald");
        assert_eq!(city, "McDonald");

        let (city, _) = query_alternates("O Fallon");
        assert_eq!(city, "O'Fallon");
    }

    #[test]
    fn query_alternates_brackets() {
        let (_, alts) = query_alternates("Estancia Santa Teresa (El Ombu)");
        assert!(alts.contains(&"El Ombu".to_string()));
        assert!(alts.contains(&"Estancia Santa Teresa".to_string()));
    }
}
