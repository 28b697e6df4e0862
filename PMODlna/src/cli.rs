use anyhow::Result;
use clap::Parser;
use pmoconfig::Config;

/// Diffuse les sinks PulseAudio vers les renderers DLNA et Chromecast
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pmodlna", version, about)]
pub struct Cli {
    /// Adresse annoncée aux renderers dans les URLs de flux
    #[arg(long, env = "PMODLNA_HOST")]
    pub host: Option<String>,

    /// Port du serveur de flux
    #[arg(long, env = "PMODLNA_PORT")]
    pub port: Option<u16>,

    /// Encodeur unique à utiliser (mp3, wav, flac, ogg, opus)
    #[arg(long, env = "PMODLNA_ENCODER")]
    pub encoder: Option<String>,

    /// Débit de l'encodeur en kbit/s
    #[arg(long = "bit-rate", env = "PMODLNA_BIT_RATE")]
    pub bit_rate: Option<u32>,

    /// Ne garder que les renderers dont le nom contient une de ces chaînes
    #[arg(long = "filter-device", value_delimiter = ',')]
    pub filter_device: Vec<String>,

    /// Ne garder que les sinks dont le nom contient une de ces chaînes
    #[arg(long = "filter-sink", value_delimiter = ',')]
    pub filter_sink: Vec<String>,

    /// URLs de description de renderers (désactive la découverte SSDP)
    #[arg(long = "renderer-urls", value_delimiter = ',')]
    pub renderer_urls: Vec<String>,

    /// Répertoire de configuration (contient config.yaml)
    #[arg(long = "config-dir")]
    pub config_dir: Option<String>,

    /// Logs en niveau DEBUG
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Applique les options explicites à la configuration (en mémoire).
    pub fn apply_to(&self, config: &Config) -> Result<()> {
        if let Some(host) = &self.host {
            config.set_bind_host(host.clone())?;
        }
        if let Some(port) = self.port {
            config.set_http_port(port)?;
        }
        if let Some(encoder) = &self.encoder {
            config.set_encoder(encoder.clone())?;
        }
        if let Some(bit_rate) = self.bit_rate {
            config.set_bit_rate(bit_rate)?;
        }
        if !self.filter_device.is_empty() {
            config.set_device_filter(self.filter_device.clone())?;
        }
        if !self.filter_sink.is_empty() {
            config.set_sink_filter(self.filter_sink.clone())?;
        }
        if !self.renderer_urls.is_empty() {
            config.set_renderer_urls(self.renderer_urls.clone())?;
        }
        if self.debug {
            config.set_log_min_level("DEBUG".to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_sources(Some("bridge:\n  device_filter: [Office]\n"), Vec::new()).unwrap()
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "pmodlna",
            "--port",
            "9000",
            "--encoder",
            "flac",
            "--filter-device",
            "Kitchen,Bedroom",
            "--debug",
        ])
        .unwrap();
        let config = config();
        cli.apply_to(&config).unwrap();

        assert_eq!(config.get_http_port(), 9000);
        assert_eq!(config.get_encoder().as_deref(), Some("flac"));
        assert_eq!(config.get_device_filter(), vec!["Kitchen", "Bedroom"]);
        assert_eq!(config.get_log_min_level(), "DEBUG");
    }

    #[test]
    fn test_absent_options_keep_config() {
        let cli = Cli::try_parse_from(["pmodlna"]).unwrap();
        let config = config();
        cli.apply_to(&config).unwrap();

        assert_eq!(config.get_device_filter(), vec!["Office"]);
        assert_eq!(config.get_encoder(), None);
        assert_eq!(config.get_log_min_level(), "INFO");
    }

    #[test]
    fn test_bit_rate_requires_number() {
        assert!(Cli::try_parse_from(["pmodlna", "--bit-rate", "fast"]).is_err());
    }
}
