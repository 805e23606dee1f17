use anyhow::Result;
use std::collections::BTreeMap;
use tracing::info;

/// Frecuencias centrales para el ecualizador de 10 bandas
pub const EQ_FREQUENCIES: [u32; 10] = [
    32,    // Sub-bass
    64,    // Bass
    125,   // Low-mid
    250,   // Mid
    500,   // Upper-mid
    1000,  // Presence
    2000,  // Brilliance
    4000,  // High
    8000,  // Very high
    16000, // Air
];

/// Rango permitido de ganancia por banda, en dB
pub const MAX_GAIN_DB: f32 = 15.0;

/// Ganancias por frecuencia (Hz → dB)
pub type EqualizerMap = BTreeMap<u32, f32>;

/// Parámetros del bass boost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BassBoost {
    pub gain_db: f32,
    pub frequency_hz: u32,
    /// Ancho de banda en Hz
    pub width_hz: u32,
}

impl BassBoost {
    pub fn new(gain_db: f32) -> Self {
        Self {
            gain_db,
            frequency_hz: 100,
            width_hz: 100,
        }
    }
}

/// Efectos que se aplican en la etapa de filtros del decoder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectParams {
    pub bass: Option<BassBoost>,
    pub equalizer: EqualizerMap,
}

impl EffectParams {
    /// `true` si no hay ningún filtro que aplicar
    pub fn is_flat(&self) -> bool {
        self.bass.map_or(true, |b| b.gain_db == 0.0)
            && self.equalizer.values().all(|gain| *gain == 0.0)
    }
}

/// Preset de ecualizador
#[derive(Debug, Clone, PartialEq)]
pub struct EqPreset {
    pub name: &'static str,
    /// Ganancias en dB, en el orden de `EQ_FREQUENCIES`
    pub gains: [f32; 10],
}

impl EqPreset {
    /// Convierte el preset en un mapa frecuencia → ganancia
    pub fn to_map(&self) -> EqualizerMap {
        EQ_FREQUENCIES
            .iter()
            .copied()
            .zip(self.gains.iter().copied())
            .collect()
    }
}

#[rustfmt::skip]
const PRESETS: [EqPreset; 8] = [
    EqPreset { name: "normal",     gains: [0.0; 10] },
    EqPreset { name: "bass",       gains: [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0] },
    EqPreset { name: "pop",        gains: [-1.0, 2.0, 4.0, 5.0, 3.0, 0.0, -1.0, -1.0, 0.0, 0.0] },
    EqPreset { name: "rock",       gains: [5.0, 4.0, 3.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0] },
    EqPreset { name: "jazz",       gains: [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0] },
    EqPreset { name: "classical",  gains: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0, -2.0, -3.0] },
    EqPreset { name: "electronic", gains: [5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 0.0, 3.0, 4.0] },
    EqPreset { name: "vocal",      gains: [-2.0, -1.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0, 0.0, -1.0] },
];

/// Presets predefinidos
pub struct EqPresets;

impl EqPresets {
    /// Obtiene un preset por nombre ("flat" es alias de "normal")
    pub fn get(name: &str) -> Option<EqPreset> {
        let name = name.trim().to_lowercase();
        let name = if name == "flat" { "normal" } else { name.as_str() };
        PRESETS.iter().find(|preset| preset.name == name).cloned()
    }

    pub fn list() -> Vec<&'static str> {
        PRESETS.iter().map(|preset| preset.name).collect()
    }
}

/// Resuelve un preset o una configuración "frecuencia:ganancia"
pub fn equalizer_from_str(input: &str) -> Result<EqualizerMap> {
    if let Some(preset) = EqPresets::get(input.trim()) {
        info!("🎛️ Preset '{}' seleccionado", preset.name);
        return Ok(preset.to_map());
    }
    parse_config(input)
}

/// Parsea una cadena de configuración de ecualizador
/// Formato: "32:2 64:1 125:0 250:-1 500:0 1k:1 2k:2 4k:1 8k:0 16k:-1"
pub fn parse_config(config: &str) -> Result<EqualizerMap> {
    let mut gains = EqualizerMap::new();

    for part in config.split_whitespace() {
        let Some((freq, gain)) = part.split_once(':') else {
            anyhow::bail!("Formato inválido en '{}', use 'frecuencia:ganancia'", part);
        };

        let frequency = parse_frequency(freq)
            .ok_or_else(|| anyhow::anyhow!("Frecuencia inválida en '{}'", part))?;
        let gain: f32 = gain
            .parse()
            .map_err(|_| anyhow::anyhow!("Ganancia inválida en '{}'", part))?;

        if !(-MAX_GAIN_DB..=MAX_GAIN_DB).contains(&gain) {
            anyhow::bail!(
                "Ganancia fuera de rango: {} (debe estar entre -15 y +15)",
                gain
            );
        }

        gains.insert(frequency, gain);
    }

    if gains.is_empty() {
        anyhow::bail!("Se espera al menos una banda 'frecuencia:ganancia'");
    }

    Ok(gains)
}

fn parse_frequency(value: &str) -> Option<u32> {
    let value = value.trim().to_lowercase();
    let frequency = match value.strip_suffix('k') {
        Some(kilo) => kilo.parse::<f32>().ok().map(|k| (k * 1000.0).round() as u32),
        None => value.parse::<u32>().ok(),
    }?;
    (20..=20_000).contains(&frequency).then_some(frequency)
}
