//! Compiled pattern tables, grouped by threat type.
//!
//! Templates use a few placeholders that expand to shared fragments:
//!
//! | Placeholder   | Matches                                                  |
//! |---------------|----------------------------------------------------------|
//! | `{CITY}`      | one or two capitalised words (`Біла Церква`)             |
//! | `{CITY_LIST}` | cities joined by `,` `/` `;` `та` `і` `й`               |
//! | `{COUNT}`     | a number with an optional `х`/`x` multiplier (`count`)   |
//! | `{THREAT}`    | drone / missile / bomb / target nouns                    |
//! | `{TOWARD}`    | `на`, `курсом на`, `в бік`, `в напрямку`, `до`          |
//! | `{GAP}`       | one char that is neither a letter nor a digit            |
//!
//! Settlement names stay case-sensitive (they must start with a capital);
//! keywords are wrapped in `(?i:…)`.

use std::sync::LazyLock;

use regex::Regex;

const NAME: &str = r"[А-ЯІЇЄҐ][А-ЯІЇЄҐа-яіїєґ'’ʼ\-]*[А-ЯІЇЄҐа-яіїєґ]";
const COUNT: &str = r"(?P<count>\d{1,3})\s*[хxХX×]?";
const THREAT: &str =
    r"(?i:бпла|бпл|ударн\w*\s+бпла|шахед\w*|шахід\w*|дрон\w*|мопед\w*|герань\w*|ракет\w*|крилат\w*|каб|каби|ціл[ьіея]\w*|балістик\w*)";
/// Unlike `\W`, this also covers emoji modifiers (U+FE0F is a mark).
const GAP: &str = r"[^\p{L}\p{N}]";
const TOWARD: &str = r"(?i:курсом\s+на|курсом\s+до|в\s+бік|у\s+бік|в\s+напрямку|у\s+напрямку|на|до)";

fn expand(template: &str) -> String {
    // Horizontal whitespace only: a name never spans lines.
    let city = format!(r"{NAME}(?:[ \t]{NAME})?");
    let city_list = format!(r"{city}(?:(?:[ \t]*[,/;][ \t]*|[ \t]+(?:та|і|й)[ \t]+){city})*");
    template
        .replace("{CITY_LIST}", &city_list)
        .replace("{CITY}", &city)
        .replace("{COUNT}", COUNT)
        .replace("{THREAT}", THREAT)
        .replace("{TOWARD}", TOWARD)
        .replace("{GAP}", GAP)
}

fn re(template: &str) -> Regex {
    let pattern = expand(template);
    Regex::new(&pattern).unwrap_or_else(|e| panic!("bad built-in pattern {template:?}: {e}"))
}

// ───────────────────────────── Line shapes ───────────────────────────────

/// Per-line patterns used by the entity extractor.
pub struct LinePatterns {
    pub city_region_parens: Regex,
    pub city_region_alias_parens: Regex,
    pub region_colon: Regex,
    pub count_threat_na_city: Regex,
    pub count_na_city: Regex,
    pub count_city: Regex,
    pub kursom_na_city: Regex,
    pub moves_to_city: Regex,
    pub grupa_kr: Regex,
    pub threat_toward_city: Regex,
    pub count_v_rayoni: Regex,
    pub threat_bilya: Regex,
    pub v_bik: Regex,
    pub v_rayoni: Regex,
    pub threat_nad: Regex,
    pub po_shahedu_na: Regex,
    pub city_to_you: Regex,
    pub arrow: Regex,
    pub special_attention: Regex,
    pub name_list: Regex,
    pub leading_count: Regex,
    pub trailing_clause: Regex,
    pub digits: Regex,
}

/// Lines that are never parsed for locations.
pub struct SkipPatterns {
    pub alert: Regex,
    pub summary: Regex,
    pub region_count: Regex,
}

// ──────────────────────────── Message rules ──────────────────────────────

pub struct KabPatterns {
    pub for_city: Regex,
    pub aviation: Regex,
    pub near: Regex,
    pub context: Regex,
}

pub struct RocketPatterns {
    pub grupa_kr: Regex,
    pub raketa_kursom: Regex,
    pub ballistika_na: Regex,
    pub high_speed: Regex,
    pub ballistic: Regex,
    pub context: Regex,
    pub ballistic_global: Regex,
}

pub struct ExplosionPatterns {
    pub media: Regex,
    pub dash: Regex,
    pub in_city: Regex,
    pub shelling: Regex,
    pub context: Regex,
}

pub struct DronePatterns {
    pub launch: Regex,
    pub launch_origin: Regex,
    pub launch_plus: Regex,
    pub recon: Regex,
}

pub struct PatternTables {
    pub ballistic_clear: Regex,
    pub kab: KabPatterns,
    pub rocket: RocketPatterns,
    pub explosion: ExplosionPatterns,
    pub drone: DronePatterns,
    pub line: LinePatterns,
    pub skip: SkipPatterns,
}

pub static PATTERNS: LazyLock<PatternTables> = LazyLock::new(|| PatternTables {
    ballistic_clear: re(r"(?i)відбій\s+(?:загрози\s+)?(?:застосування\s+)?балістик"),

    kab: KabPatterns {
        for_city: re(
            r"(?i:загроза\s+(?:застосування\s+)?(?:каб\w*|керован\w*\s+авіа\w*\s+бомб\w*))\s+(?i:для|на|по)\s+(?P<city>{CITY_LIST})",
        ),
        aviation: re(
            r"(?i:(?:пуск\w*|скид\w*|застосування)\s+каб\w*|авіаці\w*\s+(?:застосовує|скидає)\s+каб\w*)\s+(?i:на|по|в\s+бік|в\s+напрямку)\s+(?P<city>{CITY_LIST})",
        ),
        near: re(r"\b(?i:каб|каби|кабів)\s+(?i:в\s+районі|біля|поблизу|на|по)\s+(?P<city>{CITY_LIST})"),
        context: re(r"(?i)\bкаб(?:и|ів|ами|ах)?\b|керован\w*\s+авіа\w*\s+бомб|\bумпб"),
    },

    rocket: RocketPatterns {
        grupa_kr: re(r"(?i:груп\w*\s+(?:кр|крилатих\s+ракет))\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        raketa_kursom: re(
            r"(?:{COUNT}\s*)?\b(?i:ракет\w*|крилат\w*\s+ракет\w*|кр)\s+{TOWARD}\s+(?P<city>{CITY_LIST})",
        ),
        ballistika_na: re(r"(?i:балістик\w*)\s+(?i:на|в\s+бік|в\s+напрямку|по)\s+(?P<city>{CITY_LIST})"),
        high_speed: re(r"(?i:(?:високо)?швидкісн\w*\s+ціл\w*)\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        ballistic: re(r"(?i)балістик|балістичн|іскандер"),
        context: re(r"(?i)\bракет\w*|\bкр\b|крилат\w*|калібр\w*|кинджал\w*|\bх-\d+"),
        ballistic_global: re(
            r"(?im)(?:загроза|небезпека)\s+(?:застосування\s+)?балістик|балістичн\w*\s+(?:загроза|небезпека)|^{GAP}*балістика{GAP}*$",
        ),
    },

    explosion: ExplosionPatterns {
        media: re(
            r"(?P<city>{CITY})\s*\((?P<region>[^()]+)\)\s*[-–—:]?\s*(?i:змі\s+повідомляють\s+про\s+вибух\w*)",
        ),
        dash: re(r"(?m)^{GAP}*(?P<city>{CITY_LIST})\s*[-–—:]\s*(?i:вибух\w*)"),
        in_city: re(r"(?i:вибух\w*)\s+(?i:у|в)\s+(?P<city>{CITY_LIST})"),
        shelling: re(r"(?i:загроза\s+обстрілу){GAP}*?\s*(?i:для\s+)?(?P<city>{CITY_LIST})"),
        context: re(r"(?i)\bвибух\w*"),
    },

    drone: DronePatterns {
        launch: re(
            r"(?i)\b(?:пуск\w*|запуск\w*|вихід\w*|виліт\w*)\s+(?:ударних\s+)?(?:бпла|шахед\w*|дрон\w*|мопед\w*)",
        ),
        launch_origin: re(
            r"\b(?i:з|із|зі|від)\s+(?:(?i:району|р-ну|аеродрому|н\.п\.|нп)\s+)?(?P<city>{CITY})",
        ),
        launch_plus: re(r"(?m)^[^\p{L}\d+]*\+\s*(?P<city>{CITY})"),
        recon: re(
            r"(?i)орлан|\bzala\b|\bзала\b|supercam|суперкам|розвідувальн\w*\s+(?:бпла|дрон\w*)|\bрозвідник\w*",
        ),
    },

    line: LinePatterns {
        city_region_parens: re(
            r"(?P<city>{CITY})\s*\((?P<region>[^()]*?(?i:обл|область|області)[^()]*)\)",
        ),
        city_region_alias_parens: re(r"(?P<city>{CITY})\s*\((?P<region>[^()]{3,40})\)"),
        region_colon: re(r"^(?P<region>[^:]{3,40}):\s*(?P<rest>.*)$"),
        count_threat_na_city: re(r"{COUNT}\s*{THREAT}\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        count_na_city: re(r"^{GAP}*{COUNT}\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        count_city: re(r"^{GAP}*{COUNT}\s+(?P<city>{CITY_LIST}){GAP}*$"),
        kursom_na_city: re(r"(?i:курсом)\s+(?i:на|в\s+бік|до)\s+(?P<city>{CITY_LIST})"),
        moves_to_city: re(
            r"(?i:рухаєт\w*|рухают\w*|рух|пряму\w*|летит\w*|летять|летить)\s+{TOWARD}\s+(?P<city>{CITY_LIST})",
        ),
        grupa_kr: re(r"(?i:груп\w*\s+(?:кр|крилатих\s+ракет))\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        threat_toward_city: re(r"{THREAT}\s+{TOWARD}\s+(?P<city>{CITY_LIST})"),
        count_v_rayoni: re(r"{COUNT}\s+(?:\w+\s+)?(?i:в|у)\s+(?i:районі)\s+(?P<city>{CITY_LIST})"),
        threat_bilya: re(r"{THREAT}\s+(?i:біля|поблизу|неподалік\s+від|неподалік)\s+(?P<city>{CITY_LIST})"),
        v_bik: re(r"\b(?i:в|у)\s+(?i:бік|напрямку)\s+(?P<city>{CITY_LIST})"),
        v_rayoni: re(r"\b(?i:в|у)\s+(?i:районі)\s+(?P<city>{CITY_LIST})"),
        threat_nad: re(r"{THREAT}\s+(?i:над)\s+(?P<city>{CITY_LIST})"),
        po_shahedu_na: re(r"(?i:по\s+(?:одному\s+)?(?:шахеду|бпла|дрону|мопеду))\s+(?i:на)\s+(?P<city>{CITY_LIST})"),
        city_to_you: re(r"(?P<city>{CITY}){GAP}*\s*(?i:до\s+вас|на\s+вас|вас\s+атакують)"),
        arrow: re(r"^{GAP}*?(?:→|➡️?|->|⇒|⟶)\s*(?P<city>{CITY_LIST})"),
        special_attention: re(r"^{GAP}*(?i:особлива\s+увага)\s*:?\s*(?P<rest>.*)$"),
        name_list: re(r"^{GAP}*(?P<city>{CITY_LIST}){GAP}*$"),
        leading_count: re(r"^\s*\d+\s*[хxХX×]?\s*"),
        trailing_clause: re(
            r"\s+(?:з|із|зі|від|на|в|у|курсом|через|повз|до|зі\s+сторони)\s.*$|\s*[(\[].*$",
        ),
        digits: re(r"\d"),
    },

    skip: SkipPatterns {
        alert: re(
            r"(?i)повітрян\w*\s+тривог|відбій\s+(?:повітряної\s+)?тривоги|\bтривога\b\s*(?:в|у|!|$)|укритт",
        ),
        summary: re(r"(?i)^{GAP}*(?:за\s+(?:добу|ніч|минулу\s+добу|день)|підсумк\w*|статистик\w*|загалом\b)"),
        region_count: re(r"^(?P<region>[^—–\-:]{3,40}?)\s*[—–-]\s*\d+\s*[хxХX×]?{GAP}*$"),
    },
});
