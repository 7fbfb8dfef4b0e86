//! Requester location lookup
//!
//! The director only needs a continent and a country code per address. The
//! lookup itself is a capability injected at construction; the static table
//! below covers configuration-driven deployments and tests.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::topology::normalize_code;
use crate::constants::resolver::UNKNOWN_LOCATION;
use crate::errors::{ConfigError, ConfigResult};

/// Continent and country of a requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub continent: String,
    pub country: String,
}

impl Location {
    pub fn new(continent: &str, country: &str) -> Self {
        Self {
            continent: normalize_code(continent),
            country: normalize_code(country),
        }
    }

    /// Location of an address nothing is known about
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LOCATION, UNKNOWN_LOCATION)
    }

    pub fn is_unknown(&self) -> bool {
        self.country.is_empty() && self.continent.is_empty()
    }
}

/// Address → location capability
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Locate an address, `None` if it is unknown
    async fn locate(&self, address: IpAddr) -> Option<Location>;
}

/// One `[[geo.networks]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// CIDR block, e.g. `203.0.113.0/24`
    pub network: String,
    pub continent: String,
    pub country: String,
}

/// Static geo table settings (`[geo]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Location assumed for addresses no network matches
    pub fallback: Option<Location>,
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Network {
    address: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(cidr: &str) -> Option<Self> {
        let (address, prefix) = match cidr.trim().split_once('/') {
            Some((address, prefix)) => (address.parse::<IpAddr>().ok()?, Some(prefix.parse().ok()?)),
            None => (cidr.trim().parse::<IpAddr>().ok()?, None),
        };
        let max = if address.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        (prefix <= max).then_some(Self { address, prefix })
    }

    fn contains(&self, address: IpAddr) -> bool {
        match (self.address, address) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                masked(u32::from(net).into(), self.prefix, 32) == masked(u32::from(addr).into(), self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                masked(u128::from(net), self.prefix, 128) == masked(u128::from(addr), self.prefix, 128)
            }
            _ => false,
        }
    }
}

fn masked(bits: u128, prefix: u8, width: u8) -> u128 {
    if prefix == 0 {
        return 0;
    }
    let shift = u32::from(width - prefix);
    (bits >> shift) << shift
}

/// Longest-prefix lookup over configured networks
#[derive(Debug, Clone, Default)]
pub struct StaticGeoLocator {
    networks: Vec<(Network, Location)>,
    fallback: Option<Location>,
}

impl StaticGeoLocator {
    /// Build the table from configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` listing every malformed network
    pub fn from_config(config: &GeoConfig) -> ConfigResult<Self> {
        let mut errors = Vec::new();
        let mut networks = Vec::with_capacity(config.networks.len());

        for entry in &config.networks {
            match Network::parse(&entry.network) {
                Some(network) => networks.push((network, Location::new(&entry.continent, &entry.country))),
                None => errors.push(format!("invalid network '{}'", entry.network)),
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }

        networks.sort_by(|(a, _), (b, _)| b.prefix.cmp(&a.prefix));
        Ok(Self {
            networks,
            fallback: config
                .fallback
                .as_ref()
                .map(|l| Location::new(&l.continent, &l.country)),
        })
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn locate(&self, address: IpAddr) -> Option<Location> {
        self.networks
            .iter()
            .find(|(network, _)| network.contains(address))
            .map(|(_, location)| location.clone())
            .or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> StaticGeoLocator {
        let config: GeoConfig = toml::from_str(
            r#"
            fallback = { continent = "eu", country = "de" }

            [[networks]]
            network = "203.0.113.0/24"
            continent = "NA"
            country = "US"

            [[networks]]
            network = "203.0.113.128/25"
            continent = "AS"
            country = "JP"

            [[networks]]
            network = "2001:db8::/32"
            continent = "EU"
            country = "FR"
            "#,
        )
        .unwrap();
        StaticGeoLocator::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let geo = locator();
        assert_eq!(geo.len(), 3);
        assert_eq!(
            geo.locate("203.0.113.7".parse().unwrap()).await,
            Some(Location::new("NA", "US"))
        );
        assert_eq!(
            geo.locate("203.0.113.200".parse().unwrap()).await,
            Some(Location::new("AS", "JP"))
        );
        assert_eq!(
            geo.locate("2001:db8::1".parse().unwrap()).await,
            Some(Location::new("EU", "FR"))
        );
    }

    #[tokio::test]
    async fn test_fallback_location() {
        let geo = locator();
        assert_eq!(
            geo.locate("198.51.100.1".parse().unwrap()).await,
            Some(Location::new("EU", "DE"))
        );
        assert_eq!(
            StaticGeoLocator::default()
                .locate("198.51.100.1".parse().unwrap())
                .await,
            None
        );
    }

    #[test]
    fn test_network_parsing() {
        assert!(Network::parse("10.0.0.0/8").is_some());
        assert_eq!(Network::parse("10.1.2.3").unwrap().prefix, 32);
        assert!(Network::parse("10.0.0.0/33").is_none());
        assert!(Network::parse("not-an-ip/8").is_none());

        let any = Network::parse("0.0.0.0/0").unwrap();
        assert!(any.contains("192.0.2.1".parse().unwrap()));
        assert!(!any.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_network_rejected() {
        let config = GeoConfig {
            fallback: None,
            networks: vec![NetworkConfig {
                network: "300.0.0.0/8".to_string(),
                continent: "EU".to_string(),
                country: "DE".to_string(),
            }],
        };
        assert!(StaticGeoLocator::from_config(&config).is_err());
    }

    #[test]
    fn test_unknown_location() {
        assert!(Location::unknown().is_unknown());
        assert!(!Location::new("eu", "de").is_unknown());
    }
}
