//! # Catalogue des encodeurs
//!
//! Table statique des encodages audio que le pont sait produire, dans
//! l'ordre de préférence : mp3, wav, flac, ogg, opus.
//!
//! Un [`Encoder`] décrit la commande externe qui convertit le PCM brut
//! capturé sur un sink en flux encodé. Il n'est utilisable par un pont
//! qu'après validation ([`Encoder::validate`]) : la validation vérifie une
//! seule fois, au démarrage, que le binaire du codec est présent.

use std::io::ErrorKind;
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::EncoderError;
use crate::model::SampleFormat;

const MP3_BIT_RATES: &[u32] = &[32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const OGG_BIT_RATES: &[u32] = &[64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const OPUS_BIT_RATES: &[u32] = &[32, 48, 64, 96, 128, 160, 192, 256, 320];

/// Un encodage supporté et la commande qui le produit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Encoder {
    suffix: &'static str,
    mime_types: &'static [&'static str],
    command: &'static str,
    #[serde(skip)]
    bit_rates: &'static [u32],
    bit_rate: Option<u32>,
    validated: bool,
}

impl Encoder {
    const fn new(
        suffix: &'static str,
        mime_types: &'static [&'static str],
        command: &'static str,
        bit_rates: &'static [u32],
        default_bit_rate: Option<u32>,
    ) -> Self {
        Self {
            suffix,
            mime_types,
            command,
            bit_rates,
            bit_rate: default_bit_rate,
            validated: false,
        }
    }

    pub fn suffix(&self) -> &str {
        self.suffix
    }

    /// Type MIME annoncé dans la réponse HTTP
    pub fn mime_type(&self) -> &str {
        self.mime_types[0]
    }

    pub fn mime_types(&self) -> &[&'static str] {
        self.mime_types
    }

    /// Nom du binaire externe utilisé pour l'encodage
    pub fn command(&self) -> &str {
        self.command
    }

    pub fn bit_rates(&self) -> &[u32] {
        self.bit_rates
    }

    pub fn bit_rate(&self) -> Option<u32> {
        self.bit_rate
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Vrai si le device accepte l'un des types MIME de cet encodeur.
    ///
    /// La comparaison ignore la casse et les paramètres (`audio/mpeg;q=1`).
    pub fn supports_mime(&self, mime: &str) -> bool {
        let base = mime.split(';').next().unwrap_or_default().trim();
        self.mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(base))
    }

    /// Bornes `[min, max]` du débit, `None` sans débit configurable
    pub fn bit_rate_range(&self) -> Option<(u32, u32)> {
        Some((*self.bit_rates.first()?, *self.bit_rates.last()?))
    }

    /// Fixe le débit (kbit/s). Toute valeur entre les bornes est acceptée ;
    /// les débits usuels ne servent qu'au message d'erreur.
    pub fn set_bit_rate(&mut self, bit_rate: u32) -> Result<(), EncoderError> {
        let accepted = self
            .bit_rate_range()
            .is_some_and(|(min, max)| (min..=max).contains(&bit_rate));
        if !accepted {
            return Err(EncoderError::UnsupportedBitRate {
                suffix: self.suffix.to_string(),
                requested: bit_rate,
                supported: self.bit_rates.to_vec(),
            });
        }
        self.bit_rate = Some(bit_rate);
        Ok(())
    }

    /// Vérifie que le binaire du codec peut être lancé.
    pub fn validate(&mut self) -> Result<(), EncoderError> {
        self.validate_with(probe_binary)
    }

    /// Variante avec une sonde injectable
    pub fn validate_with<F>(&mut self, probe: F) -> Result<(), EncoderError>
    where
        F: Fn(&str) -> Result<(), String>,
    {
        match probe(self.command) {
            Ok(()) => {
                debug!("Encoder {} validated ({})", self.suffix, self.command);
                self.validated = true;
                Ok(())
            }
            Err(reason) => {
                self.validated = false;
                Err(EncoderError::EncoderUnavailable {
                    suffix: self.suffix.to_string(),
                    reason,
                })
            }
        }
    }

    /// Arguments de la commande d'encodage : PCM brut sur stdin, flux
    /// encodé sur stdout.
    pub fn args(&self, format: &SampleFormat) -> Vec<String> {
        let bits = format.bits.to_string();
        let channels = format.channels.to_string();
        let rate = format.rate.to_string();

        let mut args: Vec<String> = match self.suffix {
            "mp3" => {
                let mode = if format.channels == 1 { "m" } else { "j" };
                vec![
                    "--quiet".into(),
                    "-r".into(),
                    "--signed".into(),
                    "--little-endian".into(),
                    "--bitwidth".into(),
                    bits,
                    "-s".into(),
                    format!("{}", format.rate as f64 / 1000.0),
                    "-m".into(),
                    mode.into(),
                ]
            }
            "wav" => vec![
                "-q".into(),
                "-t".into(),
                "raw".into(),
                "-b".into(),
                bits,
                "-e".into(),
                "signed".into(),
                "-c".into(),
                channels,
                "-r".into(),
                rate,
                "-".into(),
                "-t".into(),
                "wav".into(),
            ],
            "flac" => vec![
                "--silent".into(),
                "--force-raw-format".into(),
                "--endian=little".into(),
                "--sign=signed".into(),
                format!("--channels={}", channels),
                format!("--bps={}", bits),
                format!("--sample-rate={}", rate),
                "-c".into(),
            ],
            "ogg" => vec![
                "-Q".into(),
                "-r".into(),
                "-B".into(),
                bits,
                "-C".into(),
                channels,
                "-R".into(),
                rate,
            ],
            "opus" => vec![
                "--quiet".into(),
                "--raw".into(),
                "--raw-bits".into(),
                bits,
                "--raw-rate".into(),
                rate,
                "--raw-chan".into(),
                channels,
            ],
            _ => Vec::new(),
        };

        if let Some(br) = self.bit_rate {
            match self.suffix {
                "mp3" | "ogg" => {
                    args.push("-b".into());
                    args.push(br.to_string());
                }
                "opus" => {
                    args.push("--bitrate".into());
                    args.push(br.to_string());
                }
                _ => {}
            }
        }

        match self.suffix {
            "mp3" | "opus" => {
                args.push("-".into());
                args.push("-".into());
            }
            "wav" | "flac" => args.push("-".into()),
            "ogg" => {
                args.push("-o".into());
                args.push("-".into());
                args.push("-".into());
            }
            _ => {}
        }
        args
    }
}

impl std::fmt::Display for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bit_rate {
            Some(br) => write!(f, "{} ({}, {} kbit/s)", self.suffix, self.mime_type(), br),
            None => write!(f, "{} ({})", self.suffix, self.mime_type()),
        }
    }
}

/// Tous les encodeurs connus, du plus préféré au moins préféré
pub fn list_encoders() -> Vec<Encoder> {
    vec![
        Encoder::new("mp3", &["audio/mpeg", "audio/mp3"], "lame", MP3_BIT_RATES, Some(192)),
        Encoder::new("wav", &["audio/wav", "audio/x-wav"], "sox", &[], None),
        Encoder::new("flac", &["audio/flac", "audio/x-flac"], "flac", &[], None),
        Encoder::new("ogg", &["audio/ogg", "application/ogg"], "oggenc", OGG_BIT_RATES, Some(192)),
        Encoder::new("opus", &["audio/opus"], "opusenc", OPUS_BIT_RATES, Some(128)),
    ]
}

pub fn select_by_suffix(suffix: &str) -> Result<Encoder, EncoderError> {
    list_encoders()
        .into_iter()
        .find(|e| e.suffix.eq_ignore_ascii_case(suffix))
        .ok_or_else(|| EncoderError::NotFound(suffix.to_string()))
}

/// Premier encodeur validé (dans l'ordre de `encoders`) dont un type MIME
/// est accepté par le device.
pub fn negotiate<'a>(accepted: &[String], encoders: &'a [Encoder]) -> Option<&'a Encoder> {
    encoders
        .iter()
        .filter(|e| e.validated)
        .find(|e| accepted.iter().any(|m| e.supports_mime(m)))
}

/// Prépare la liste d'encodeurs utilisables au démarrage.
///
/// - avec `selection`, seul cet encodeur est retenu et toute erreur
///   (suffixe inconnu, débit refusé, codec absent) est fatale ;
/// - sans `selection`, le débit n'est appliqué qu'aux encodeurs qui en ont
///   la notion, et un encodeur qui le refuse ou dont le codec manque est
///   simplement écarté.
pub fn prepare_encoders<F>(
    selection: Option<&str>,
    bit_rate: Option<u32>,
    probe: F,
) -> Result<Vec<Encoder>, EncoderError>
where
    F: Fn(&str) -> Result<(), String>,
{
    if let Some(suffix) = selection {
        let mut encoder = select_by_suffix(suffix)?;
        if let Some(br) = bit_rate {
            encoder.set_bit_rate(br)?;
        }
        encoder.validate_with(&probe)?;
        return Ok(vec![encoder]);
    }

    let mut usable = Vec::new();
    for mut encoder in list_encoders() {
        if let Some(br) = bit_rate {
            if !encoder.bit_rates.is_empty() {
                if let Err(e) = encoder.set_bit_rate(br) {
                    warn!("⚠️ Excluding encoder {}: {}", encoder.suffix, e);
                    continue;
                }
            }
        }
        match encoder.validate_with(&probe) {
            Ok(()) => usable.push(encoder),
            Err(e) => warn!("⚠️ {}", e),
        }
    }

    if usable.is_empty() {
        return Err(EncoderError::NoEncoderAvailable);
    }
    Ok(usable)
}

/// Sonde par défaut : lance `<binary> --version` sans sortie.
pub fn probe_binary(binary: &str) -> Result<(), String> {
    match Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(format!("{} is not installed", binary)),
        Err(e) => Err(format!("cannot run {}: {}", binary, e)),
    }
}
