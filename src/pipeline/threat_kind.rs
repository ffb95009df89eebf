// ───────────────────────────── Threat kinds ──────────────────────────────

/// Threat categories an emitted event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatKind {
    Drone,
    Rocket,
    GuidedBomb, // КАБ / УМПБ
    Explosion,
    BallisticThreat,
    BallisticClear, // "відбій загрози балістики"
    Launch,         // launch site on foreign territory
    Reconnaissance, // Орлан / Zala / Supercam
    Unknown,
}

impl ThreatKind {
    /// Label that opens every outbound alert line.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Drone => "БПЛА",
            Self::Rocket => "Ракета",
            Self::GuidedBomb => "КАБ",
            Self::Explosion => "Вибухи",
            Self::BallisticThreat => "Балістика",
            Self::BallisticClear => "Відбій балістики",
            Self::Launch => "Пуск",
            Self::Reconnaissance => "Розвідувальний БПЛА",
            Self::Unknown => "Невідомо",
        }
    }

    /// Area-wide kinds that are meaningful without a settlement.
    pub fn is_city_less(&self) -> bool {
        matches!(self, Self::BallisticThreat | Self::BallisticClear)
    }

    /// Stable English name used for oracle JSON interchange and dedup keys.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Drone => "Drone",
            Self::Rocket => "Rocket",
            Self::GuidedBomb => "GuidedBomb",
            Self::Explosion => "Explosion",
            Self::BallisticThreat => "BallisticThreat",
            Self::BallisticClear => "BallisticClear",
            Self::Launch => "Launch",
            Self::Reconnaissance => "Reconnaissance",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse from an oracle answer. Accepts the English variant names and
    /// the Ukrainian labels the oracle tends to echo back.
    pub fn from_variant_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "drone" | "бпла" | "шахед" => Some(Self::Drone),
            "rocket" | "missile" | "ракета" => Some(Self::Rocket),
            "guidedbomb" | "guided_bomb" | "kab" | "каб" => Some(Self::GuidedBomb),
            "explosion" | "вибухи" | "вибух" => Some(Self::Explosion),
            "ballisticthreat" | "ballistic" | "балістика" => Some(Self::BallisticThreat),
            "ballisticclear" | "all_clear" => Some(Self::BallisticClear),
            "launch" | "пуск" => Some(Self::Launch),
            "reconnaissance" | "recon" | "розвідка" => Some(Self::Reconnaissance),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}
