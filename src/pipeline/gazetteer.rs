//! Static geography: the canonical region set, colloquial region aliases,
//! the settlement → region dictionary, per-channel region hints, coarse
//! bounding boxes and the non-location skip list.
//!
//! Everything is assembled once at startup into an immutable [`Gazetteer`]
//! and handed to the extractor / resolver by reference.  Tests build small
//! synthetic gazetteers with [`Gazetteer::new`].

use std::collections::{HashMap, HashSet};

/// Region sentinel for launch sites outside the country.
pub const FOREIGN_TERRITORY: &str = "РФ";

/// Coarse lat/lon rectangle used as a sanity filter on geocoder answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub const fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }
}

/// Compile-time description of one first-level region.
pub struct RegionDef {
    /// Canonical output form, e.g. `Харківська обл.`
    pub canonical: &'static str,
    /// Lower-cased adjective stem; any adjectival form continuing it with a
    /// case ending (`харківська`, `харківської`, …) resolves to this region.
    pub root: &'static str,
    /// Colloquial stems (`харківщин`) inflected with the usual endings.
    pub colloquial: &'static [&'static str],
    /// Extra literal aliases (lower-cased).
    pub aliases: &'static [&'static str],
    pub bounds: Option<BoundingBox>,
}

const fn bb(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Option<BoundingBox> {
    Some(BoundingBox::new(lat_min, lat_max, lon_min, lon_max))
}

pub const UKRAINE_REGIONS: &[RegionDef] = &[
    RegionDef { canonical: "Вінницька обл.", root: "вінницьк", colloquial: &["вінниччин"], aliases: &[], bounds: bb(48.0, 50.0, 27.5, 30.5) },
    RegionDef { canonical: "Волинська обл.", root: "волинськ", colloquial: &["волинщин"], aliases: &["волинь", "волині"], bounds: bb(50.5, 52.0, 23.5, 26.0) },
    RegionDef { canonical: "Дніпропетровська обл.", root: "дніпропетровськ", colloquial: &["дніпропетровщин", "дніпровщин"], aliases: &["січеславщина"], bounds: bb(47.5, 49.5, 33.5, 36.5) },
    RegionDef { canonical: "Донецька обл.", root: "донецьк", colloquial: &["донеччин"], aliases: &["донбас"], bounds: bb(47.0, 49.5, 36.5, 39.5) },
    RegionDef { canonical: "Житомирська обл.", root: "житомирськ", colloquial: &["житомирщин"], aliases: &[], bounds: bb(49.5, 51.5, 27.5, 31.5) },
    RegionDef { canonical: "Закарпатська обл.", root: "закарпатськ", colloquial: &["закарпатщин"], aliases: &["закарпаття", "закарпатті"], bounds: bb(47.5, 49.0, 22.0, 24.5) },
    RegionDef { canonical: "Запорізька обл.", root: "запорізьк", colloquial: &["запоріжчин"], aliases: &[], bounds: bb(46.5, 48.5, 34.0, 37.5) },
    RegionDef { canonical: "Івано-Франківська обл.", root: "івано-франківськ", colloquial: &["івано-франківщин", "франківщин"], aliases: &["прикарпаття", "прикарпатті"], bounds: bb(48.0, 49.5, 23.5, 25.5) },
    RegionDef { canonical: "Київська обл.", root: "київськ", colloquial: &["київщин"], aliases: &[], bounds: bb(49.0, 51.5, 29.0, 32.5) },
    RegionDef { canonical: "Кіровоградська обл.", root: "кіровоградськ", colloquial: &["кіровоградщин", "кропивниччин"], aliases: &[], bounds: bb(47.5, 49.5, 30.5, 33.5) },
    RegionDef { canonical: "Луганська обл.", root: "луганськ", colloquial: &["луганщин"], aliases: &[], bounds: bb(48.0, 50.0, 37.5, 40.5) },
    RegionDef { canonical: "Львівська обл.", root: "львівськ", colloquial: &["львівщин"], aliases: &[], bounds: bb(49.0, 50.5, 22.5, 25.0) },
    RegionDef { canonical: "Миколаївська обл.", root: "миколаївськ", colloquial: &["миколаївщин"], aliases: &[], bounds: bb(46.0, 48.5, 30.5, 33.5) },
    RegionDef { canonical: "Одеська обл.", root: "одеськ", colloquial: &["одещин"], aliases: &[], bounds: bb(45.0, 48.5, 28.5, 33.5) },
    RegionDef { canonical: "Полтавська обл.", root: "полтавськ", colloquial: &["полтавщин"], aliases: &[], bounds: bb(48.5, 50.5, 32.0, 35.5) },
    RegionDef { canonical: "Рівненська обл.", root: "рівненськ", colloquial: &["рівненщин"], aliases: &[], bounds: bb(50.0, 52.0, 25.0, 27.5) },
    RegionDef { canonical: "Сумська обл.", root: "сумськ", colloquial: &["сумщин"], aliases: &[], bounds: bb(50.0, 52.5, 32.5, 35.5) },
    RegionDef { canonical: "Тернопільська обл.", root: "тернопільськ", colloquial: &["тернопільщин"], aliases: &[], bounds: bb(48.5, 50.0, 24.5, 26.5) },
    RegionDef { canonical: "Харківська обл.", root: "харківськ", colloquial: &["харківщин"], aliases: &["слобожанщина"], bounds: bb(48.5, 50.5, 34.5, 38.5) },
    RegionDef { canonical: "Херсонська обл.", root: "херсонськ", colloquial: &["херсонщин"], aliases: &[], bounds: bb(45.5, 47.5, 32.0, 35.5) },
    RegionDef { canonical: "Хмельницька обл.", root: "хмельницьк", colloquial: &["хмельниччин"], aliases: &["поділля"], bounds: bb(48.5, 50.5, 25.5, 28.5) },
    RegionDef { canonical: "Черкаська обл.", root: "черкаськ", colloquial: &["черкащин"], aliases: &[], bounds: bb(48.5, 50.0, 30.5, 33.0) },
    RegionDef { canonical: "Чернівецька обл.", root: "чернівецьк", colloquial: &[], aliases: &["буковина", "буковині", "буковину"], bounds: bb(47.7, 48.7, 24.9, 27.6) },
    RegionDef { canonical: "Чернігівська обл.", root: "чернігівськ", colloquial: &["чернігівщин"], aliases: &[], bounds: bb(50.5, 52.5, 30.5, 33.5) },
    RegionDef { canonical: "АР Крим", root: "кримськ", colloquial: &[], aliases: &["крим", "криму", "ар крим", "автономна республіка крим", "республіка крим"], bounds: bb(44.3, 46.3, 32.4, 36.7) },
];

/// Case endings of colloquial region names (`Харківщин|а|и|і|у|ою`).
const COLLOQUIAL_ENDINGS: &[&str] = &["а", "и", "і", "у", "ою"];

/// Adjective case endings that may follow a region root.
const ADJECTIVE_ENDINGS: &[char] = &['а', 'о', 'і', 'у', 'и'];

/// Well-known settlements → canonical region.  Administrative centres, large
/// cities and the towns that alert channels mention most.
pub const UKRAINE_CITIES: &[(&str, &str)] = &[
    // Київська
    ("Київ", "Київська обл."),
    ("Бровари", "Київська обл."),
    ("Бориспіль", "Київська обл."),
    ("Біла Церква", "Київська обл."),
    ("Фастів", "Київська обл."),
    ("Ірпінь", "Київська обл."),
    ("Буча", "Київська обл."),
    ("Васильків", "Київська обл."),
    ("Обухів", "Київська обл."),
    ("Вишгород", "Київська обл."),
    ("Славутич", "Київська обл."),
    ("Бородянка", "Київська обл."),
    ("Велика Димерка", "Київська обл."),
    ("Переяслав", "Київська обл."),
    ("Яготин", "Київська обл."),
    // Харківська
    ("Харків", "Харківська обл."),
    ("Богодухів", "Харківська обл."),
    ("Чугуїв", "Харківська обл."),
    ("Ізюм", "Харківська обл."),
    ("Куп'янськ", "Харківська обл."),
    ("Лозова", "Харківська обл."),
    ("Балаклія", "Харківська обл."),
    ("Вовчанськ", "Харківська обл."),
    ("Дергачі", "Харківська обл."),
    ("Мерефа", "Харківська обл."),
    ("Люботин", "Харківська обл."),
    ("Красноград", "Харківська обл."),
    ("Валки", "Харківська обл."),
    ("Зміїв", "Харківська обл."),
    ("Золочів", "Харківська обл."),
    ("Краснокутськ", "Харківська обл."),
    ("Нова Водолага", "Харківська обл."),
    ("Стара Салтівка", "Харківська обл."),
    ("Печеніги", "Харківська обл."),
    ("Барвінкове", "Харківська обл."),
    ("Козача Лопань", "Харківська обл."),
    ("Хотімля", "Харківська обл."),
    ("Гнилиця Перша", "Харківська обл."),
    // Сумська
    ("Суми", "Сумська обл."),
    ("Шостка", "Сумська обл."),
    ("Конотоп", "Сумська обл."),
    ("Охтирка", "Сумська обл."),
    ("Ромни", "Сумська обл."),
    ("Глухів", "Сумська обл."),
    ("Тростянець", "Сумська обл."),
    ("Лебедин", "Сумська обл."),
    ("Кролевець", "Сумська обл."),
    ("Путивль", "Сумська обл."),
    ("Білопілля", "Сумська обл."),
    ("Краснопілля", "Сумська обл."),
    ("Середина-Буда", "Сумська обл."),
    ("Ворожба", "Сумська обл."),
    ("Велика Писарівка", "Сумська обл."),
    // Чернігівська
    ("Чернігів", "Чернігівська обл."),
    ("Ніжин", "Чернігівська обл."),
    ("Прилуки", "Чернігівська обл."),
    ("Новгород-Сіверський", "Чернігівська обл."),
    ("Бахмач", "Чернігівська обл."),
    ("Мена", "Чернігівська обл."),
    ("Корюківка", "Чернігівська обл."),
    ("Городня", "Чернігівська обл."),
    ("Семенівка", "Чернігівська обл."),
    ("Козелець", "Чернігівська обл."),
    ("Носівка", "Чернігівська обл."),
    // Полтавська
    ("Полтава", "Полтавська обл."),
    ("Кременчук", "Полтавська обл."),
    ("Миргород", "Полтавська обл."),
    ("Лубни", "Полтавська обл."),
    ("Гадяч", "Полтавська обл."),
    ("Горішні Плавні", "Полтавська обл."),
    ("Карлівка", "Полтавська обл."),
    ("Зіньків", "Полтавська обл."),
    // Дніпропетровська
    ("Дніпро", "Дніпропетровська обл."),
    ("Кривий Ріг", "Дніпропетровська обл."),
    ("Павлоград", "Дніпропетровська обл."),
    ("Нікополь", "Дніпропетровська обл."),
    ("Марганець", "Дніпропетровська обл."),
    ("Кам'янське", "Дніпропетровська обл."),
    ("Самар", "Дніпропетровська обл."),
    ("Новомосковськ", "Дніпропетровська обл."),
    ("Синельникове", "Дніпропетровська обл."),
    ("Жовті Води", "Дніпропетровська обл."),
    ("Покров", "Дніпропетровська обл."),
    ("Першотравенськ", "Дніпропетровська обл."),
    ("Межова", "Дніпропетровська обл."),
    ("Апостолове", "Дніпропетровська обл."),
    ("Саксагань", "Дніпропетровська обл."),
    // Запорізька
    ("Запоріжжя", "Запорізька обл."),
    ("Мелітополь", "Запорізька обл."),
    ("Енергодар", "Запорізька обл."),
    ("Бердянськ", "Запорізька обл."),
    ("Оріхів", "Запорізька обл."),
    ("Гуляйполе", "Запорізька обл."),
    ("Вільнянськ", "Запорізька обл."),
    ("Токмак", "Запорізька обл."),
    ("Пологи", "Запорізька обл."),
    // Донецька
    ("Краматорськ", "Донецька обл."),
    ("Слов'янськ", "Донецька обл."),
    ("Покровськ", "Донецька обл."),
    ("Костянтинівка", "Донецька обл."),
    ("Дружківка", "Донецька обл."),
    ("Бахмут", "Донецька обл."),
    ("Маріуполь", "Донецька обл."),
    ("Лиман", "Донецька обл."),
    ("Добропілля", "Донецька обл."),
    ("Мирноград", "Донецька обл."),
    ("Донецьк", "Донецька обл."),
    // Луганська
    ("Сєвєродонецьк", "Луганська обл."),
    ("Лисичанськ", "Луганська обл."),
    ("Луганськ", "Луганська обл."),
    ("Старобільськ", "Луганська обл."),
    // Херсонська
    ("Херсон", "Херсонська обл."),
    ("Нова Каховка", "Херсонська обл."),
    ("Каховка", "Херсонська обл."),
    ("Берислав", "Херсонська обл."),
    ("Скадовськ", "Херсонська обл."),
    ("Генічеськ", "Херсонська обл."),
    ("Бериславщина", "Херсонська обл."),
    // Миколаївська
    ("Миколаїв", "Миколаївська обл."),
    ("Вознесенськ", "Миколаївська обл."),
    ("Очаків", "Миколаївська обл."),
    ("Первомайськ", "Миколаївська обл."),
    ("Южноукраїнськ", "Миколаївська обл."),
    ("Баштанка", "Миколаївська обл."),
    ("Снігурівка", "Миколаївська обл."),
    // Одеська
    ("Одеса", "Одеська обл."),
    ("Ізмаїл", "Одеська обл."),
    ("Білгород-Дністровський", "Одеська обл."),
    ("Чорноморськ", "Одеська обл."),
    ("Южне", "Одеська обл."),
    ("Подільськ", "Одеська обл."),
    ("Рені", "Одеська обл."),
    ("Затока", "Одеська обл."),
    ("Кілія", "Одеська обл."),
    // Черкаська
    ("Черкаси", "Черкаська обл."),
    ("Умань", "Черкаська обл."),
    ("Сміла", "Черкаська обл."),
    ("Золотоноша", "Черкаська обл."),
    ("Канів", "Черкаська обл."),
    // Кіровоградська
    ("Кропивницький", "Кіровоградська обл."),
    ("Олександрія", "Кіровоградська обл."),
    ("Знам'янка", "Кіровоградська обл."),
    ("Світловодськ", "Кіровоградська обл."),
    ("Долинська", "Кіровоградська обл."),
    // Житомирська
    ("Житомир", "Житомирська обл."),
    ("Бердичів", "Житомирська обл."),
    ("Коростень", "Житомирська обл."),
    ("Звягель", "Житомирська обл."),
    ("Овруч", "Житомирська обл."),
    ("Малин", "Житомирська обл."),
    // Вінницька
    ("Вінниця", "Вінницька обл."),
    ("Жмеринка", "Вінницька обл."),
    ("Козятин", "Вінницька обл."),
    ("Могилів-Подільський", "Вінницька обл."),
    ("Калинівка", "Вінницька обл."),
    ("Ладижин", "Вінницька обл."),
    // Хмельницька
    ("Хмельницький", "Хмельницька обл."),
    ("Кам'янець-Подільський", "Хмельницька обл."),
    ("Шепетівка", "Хмельницька обл."),
    ("Старокостянтинів", "Хмельницька обл."),
    ("Нетішин", "Хмельницька обл."),
    // Рівненська
    ("Рівне", "Рівненська обл."),
    ("Дубно", "Рівненська обл."),
    ("Вараш", "Рівненська обл."),
    ("Сарни", "Рівненська обл."),
    // Волинська
    ("Луцьк", "Волинська обл."),
    ("Ковель", "Волинська обл."),
    ("Нововолинськ", "Волинська обл."),
    // Львівська
    ("Львів", "Львівська обл."),
    ("Дрогобич", "Львівська обл."),
    ("Стрий", "Львівська обл."),
    ("Шептицький", "Львівська обл."),
    ("Самбір", "Львівська обл."),
    // Тернопільська
    ("Тернопіль", "Тернопільська обл."),
    ("Чортків", "Тернопільська обл."),
    ("Кременець", "Тернопільська обл."),
    // Івано-Франківська
    ("Івано-Франківськ", "Івано-Франківська обл."),
    ("Калуш", "Івано-Франківська обл."),
    ("Коломия", "Івано-Франківська обл."),
    ("Бурштин", "Івано-Франківська обл."),
    // Закарпатська
    ("Ужгород", "Закарпатська обл."),
    ("Мукачево", "Закарпатська обл."),
    ("Хуст", "Закарпатська обл."),
    // Чернівецька
    ("Чернівці", "Чернівецька обл."),
    ("Сторожинець", "Чернівецька обл."),
    // Крим
    ("Сімферополь", "АР Крим"),
    ("Севастополь", "АР Крим"),
    ("Джанкой", "АР Крим"),
    ("Керч", "АР Крим"),
];

/// Channels that report on one fixed region; seeds `currentRegion`.
pub const UKRAINE_CHANNEL_HINTS: &[(&str, &str)] = &[
    ("vanek_nikolaev", "Миколаївська обл."),
    ("korabely_media", "Миколаївська обл."),
    ("odessaveter", "Одеська обл."),
    ("veselyy_pivden", "Одеська обл."),
    ("monitor1654", "Сумська обл."),
];

/// Tokens that look like names but never denote a settlement: informational
/// words, partial words, administrative nouns.
const SKIP_WORDS: &[&str] = &[
    "місто", "міста", "місту", "містом", "місті",
    "село", "села", "селом", "селі", "селище", "селища",
    "область", "області", "обл", "обл.", "район", "району", "районі", "р-н",
    "громада", "громади", "громаді", "околиці", "околицях", "околиця",
    "передмістя", "передмісті", "центр", "центру", "місцевості",
    "напрямок", "напрямку", "напрямі", "курс", "курсом",
    "увага", "повторно", "оновлення", "інформація", "прим", "онов", "upd",
    "тривога", "тривоги", "відбій", "загроза", "загрози", "небо",
    "ціль", "цілі", "ціллю", "ракета", "ракети", "бпла", "шахед", "шахеди",
    "дрон", "дрони", "мопед", "мопеди", "каб", "каби", "вибухи", "вибух",
    "укриття", "узбережжя", "акваторія", "акваторії", "кордон", "кордону",
    "ворог", "територія", "території", "нп", "н.п.", "населений пункт",
    "чисто", "група", "групи", "кілька", "декілька", "ще", "також",
    "півночі", "півдня", "сходу", "заходу", "моря", "море",
    "україна", "україни", "україну", "рф", "росія", "росії",
];

/// Lower-case, unify apostrophes and fold `ё → е`; the key form used for
/// every dictionary and cache lookup.
pub fn fold(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{02BC}' | '`' | '\u{2018}' => '\'',
            'ё' | 'Ё' => 'е',
            c => c,
        })
        .collect::<String>()
        .to_lowercase()
}

struct Region {
    name: String,
    root: String,
    bounds: Option<BoundingBox>,
}

/// Immutable lookup tables shared by the extractor, validator and resolver.
pub struct Gazetteer {
    regions: Vec<Region>,
    /// Alias → region index, in declaration order (scans stay deterministic).
    aliases: Vec<(String, usize)>,
    alias_index: HashMap<String, usize>,
    cities: HashMap<String, (String, usize)>,
    channel_hints: HashMap<String, usize>,
    skip_words: HashSet<String>,
}

impl Gazetteer {
    /// Built-in national tables.
    pub fn ukraine() -> Self {
        Self::new(UKRAINE_REGIONS, UKRAINE_CITIES).with_channel_hints(UKRAINE_CHANNEL_HINTS.iter().copied())
    }

    /// Build from explicit tables.  Cities naming an unknown region are
    /// dropped.
    pub fn new(region_defs: &[RegionDef], cities: &[(&str, &str)]) -> Self {
        let mut regions = Vec::with_capacity(region_defs.len());
        let mut aliases = Vec::new();

        for (idx, def) in region_defs.iter().enumerate() {
            regions.push(Region {
                name: def.canonical.to_string(),
                root: def.root.to_string(),
                bounds: def.bounds,
            });
            aliases.push((fold(def.canonical), idx));
            for stem in def.colloquial {
                for ending in COLLOQUIAL_ENDINGS {
                    aliases.push((format!("{stem}{ending}"), idx));
                }
            }
            for alias in def.aliases {
                aliases.push((fold(alias), idx));
            }
        }

        let alias_index = aliases.iter().cloned().collect();

        let mut gaz = Self {
            regions,
            aliases,
            alias_index,
            cities: HashMap::new(),
            channel_hints: HashMap::new(),
            skip_words: SKIP_WORDS.iter().map(|w| w.to_string()).collect(),
        };

        for &(city, region) in cities {
            if let Some(idx) = gaz.region_index(region) {
                gaz.cities.insert(fold(city), (city.to_string(), idx));
            }
        }
        gaz
    }

    /// Add `channel → region` hints.  Unknown regions are ignored.
    pub fn with_channel_hints<'a>(mut self, hints: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (channel, region) in hints {
            if let Some(idx) = self.canonical_index(region) {
                self.channel_hints
                    .insert(channel.trim().trim_start_matches('@').to_lowercase(), idx);
            }
        }
        self
    }

    fn region_index(&self, canonical: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name == canonical)
    }

    fn canonical_index(&self, raw: &str) -> Option<usize> {
        let key = fold(raw);
        let key = key.trim_end_matches(':').trim();
        if let Some(&idx) = self.alias_index.get(key) {
            return Some(idx);
        }

        let stripped = strip_region_noun(key);
        if let Some(&idx) = self.alias_index.get(stripped) {
            return Some(idx);
        }

        self.regions.iter().position(|r| {
            stripped
                .strip_prefix(r.root.as_str())
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| ADJECTIVE_ENDINGS.contains(&c))
        })
    }

    /// Map any recognised region spelling (canonical, adjectival with or
    /// without `область`/`обл.`, colloquial, alias) to its canonical form.
    pub fn canonical_region(&self, raw: &str) -> Option<&str> {
        self.canonical_index(raw).map(|i| self.regions[i].name.as_str())
    }

    /// `true` only for an exact canonical name.
    pub fn is_region(&self, name: &str) -> bool {
        self.regions.iter().any(|r| r.name == name)
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.name.as_str())
    }

    /// Lower-cased adjective root of a canonical region (`харківськ`).
    pub fn region_root(&self, canonical: &str) -> Option<&str> {
        self.regions.iter().find(|r| r.name == canonical).map(|r| r.root.as_str())
    }

    pub fn bounds(&self, canonical: &str) -> Option<BoundingBox> {
        self.regions.iter().find(|r| r.name == canonical).and_then(|r| r.bounds)
    }

    /// First region alias mentioned anywhere in `text`.
    pub fn region_alias_in(&self, text: &str) -> Option<&str> {
        let lower = fold(text);
        self.aliases
            .iter()
            .find(|(alias, _)| alias.chars().count() >= 4 && contains_word(&lower, alias))
            .map(|(_, idx)| self.regions[*idx].name.as_str())
    }

    /// Whether the token is a region name in any form rather than a
    /// settlement: an alias, an adjectival region form, or a name carrying a
    /// region suffix.
    pub fn is_region_like(&self, name: &str) -> bool {
        let key = fold(name);
        if self.cities.contains_key(&key) {
            return false;
        }
        if key.contains("область") || key.contains("обл.") || key.ends_with(" обл") {
            return true;
        }
        if ["щина", "щини", "щину", "ччина", "ччини", "ччину"]
            .iter()
            .any(|s| key.ends_with(s))
        {
            return true;
        }
        if ["ська", "цька", "зька", "ської", "цької", "зької"]
            .iter()
            .any(|s| key.ends_with(s))
        {
            return true;
        }
        self.alias_index.contains_key(&key)
    }

    /// Dictionary region for a settlement (case-insensitive).
    pub fn region_of_city(&self, city: &str) -> Option<&str> {
        self.cities
            .get(&fold(city))
            .map(|(_, idx)| self.regions[*idx].name.as_str())
    }

    /// Dictionary spelling of a known settlement.
    pub fn canonical_city(&self, city: &str) -> Option<&str> {
        self.cities.get(&fold(city)).map(|(name, _)| name.as_str())
    }

    pub fn is_known_city(&self, city: &str) -> bool {
        self.cities.contains_key(&fold(city))
    }

    pub fn channel_region(&self, channel: &str) -> Option<&str> {
        self.channel_hints
            .get(&channel.trim().trim_start_matches('@').to_lowercase())
            .map(|idx| self.regions[*idx].name.as_str())
    }

    pub fn is_skip_word(&self, word: &str) -> bool {
        self.skip_words.contains(&fold(word))
    }

    /// Whether `name` is literally present in `text`, or is a region whose
    /// alias / adjectival root is.  Used to reject oracle answers that do not
    /// come from the message.
    pub fn is_grounded_in(&self, text: &str, name: &str) -> bool {
        let lower = fold(text);
        let key = fold(name);
        if key.is_empty() {
            return false;
        }
        if lower.contains(&key) {
            return true;
        }
        let Some(idx) = self.canonical_index(name) else {
            return false;
        };
        lower.contains(&self.regions[idx].root)
            || self
                .aliases
                .iter()
                .any(|(alias, i)| *i == idx && lower.contains(alias.as_str()))
    }
}

fn strip_region_noun(key: &str) -> &str {
    for suffix in [" області", " область", " обл.", " обл"] {
        if let Some(rest) = key.strip_suffix(suffix) {
            return rest.trim();
        }
    }
    key
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(pos, _)| {
        let before = haystack[..pos].chars().next_back();
        let after = haystack[pos + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_spellings_canonicalise() {
        let gaz = Gazetteer::ukraine();
        assert_eq!(gaz.canonical_region("Харківщина"), Some("Харківська обл."));
        assert_eq!(gaz.canonical_region("Харківщини"), Some("Харківська обл."));
        assert_eq!(gaz.canonical_region("Харківська область"), Some("Харківська обл."));
        assert_eq!(gaz.canonical_region("харківської обл."), Some("Харківська обл."));
        assert_eq!(gaz.canonical_region("Сумська обл"), Some("Сумська обл."));
        assert_eq!(gaz.canonical_region("Донеччина:"), Some("Донецька обл."));
        assert_eq!(gaz.canonical_region("Крим"), Some("АР Крим"));
    }

    #[test]
    fn city_names_are_not_regions() {
        let gaz = Gazetteer::ukraine();
        assert_eq!(gaz.canonical_region("Харків"), None);
        assert_eq!(gaz.canonical_region("Донецьк"), None);
        assert_eq!(gaz.canonical_region("Луганськ"), None);
        assert!(!gaz.is_region_like("Долинська"));
        assert!(gaz.is_region_like("Миколаївська"));
        assert!(gaz.is_region_like("Сумщина"));
    }

    #[test]
    fn city_lookup_is_case_and_apostrophe_insensitive() {
        let gaz = Gazetteer::ukraine();
        assert_eq!(gaz.region_of_city("КИЇВ"), Some("Київська обл."));
        assert_eq!(gaz.region_of_city("Куп’янськ"), Some("Харківська обл."));
        assert_eq!(gaz.region_of_city("Атлантида"), None);
    }

    #[test]
    fn alias_scan_respects_word_boundaries() {
        let gaz = Gazetteer::ukraine();
        assert_eq!(gaz.region_alias_in("2 шахеди на Сумщину"), Some("Сумська обл."));
        assert_eq!(gaz.region_alias_in("кримінальна справа"), None);
    }

    #[test]
    fn channel_hints_ignore_at_sign_and_case() {
        let gaz = Gazetteer::ukraine();
        assert_eq!(gaz.channel_region("@Vanek_Nikolaev"), Some("Миколаївська обл."));
        assert_eq!(gaz.channel_region("unknown"), None);
    }

    #[test]
    fn synthetic_tables_drop_cities_of_unknown_regions() {
        let gaz = Gazetteer::new(
            &UKRAINE_REGIONS[..1],
            &[("Жмеринка", "Вінницька обл."), ("Харків", "Харківська обл.")],
        );
        assert!(gaz.is_known_city("Жмеринка"));
        assert!(!gaz.is_known_city("Харків"));
        assert_eq!(gaz.regions().count(), 1);
    }

    #[test]
    fn grounding_accepts_region_aliases() {
        let gaz = Gazetteer::ukraine();
        let text = "Харківщина: 2 на Богодухів";
        assert!(gaz.is_grounded_in(text, "Богодухів"));
        assert!(gaz.is_grounded_in(text, "Харківська обл."));
        assert!(!gaz.is_grounded_in(text, "Полтава"));
    }

    #[test]
    fn bounding_box_contains_its_centre() {
        let gaz = Gazetteer::ukraine();
        let b = gaz.bounds("Харківська обл.").unwrap();
        assert!(b.contains(49.99, 36.23));
        assert!(!b.contains(46.48, 30.72));
    }
}
