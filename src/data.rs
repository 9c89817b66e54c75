//! Production panel containers and validation utilities shared by both estimators.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FarmdistError, Result};

/// Supported world regions, in canonical order.
pub const REGIONS: [&str; 5] = [
    "Sub-Saharan Africa",
    "South Asia",
    "East Asia & Pacific",
    "Latin America",
    "Europe & North America",
];

/// Crop catalog the simulator draws from. Real datasets may use any prefix of it.
pub const CROPS: [&str; 10] = [
    "wheat", "rice", "maize", "soybean", "barley", "cassava", "potato", "sorghum", "millet",
    "pulses",
];

/// Farm-size classes in hectares, ordered from smallest to largest holdings.
pub const FARM_SIZES: [&str; 7] = ["0-1", "1-2", "2-5", "5-10", "10-20", "20-50", "50+"];

/// Returns the ordinal rank of a farm-size class, smallest holdings first.
pub fn farm_size_rank(label: &str) -> Option<usize> {
    FARM_SIZES.iter().position(|s| *s == label)
}

/// A single production observation for one (country, crop, farm-size) cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    /// Stable numeric identifier of the country.
    pub country_id: u32,
    /// Display name of the country.
    pub country_name: String,
    /// World region, one of [`REGIONS`].
    pub region: String,
    /// Development index in `[0, 1]`, constant per country.
    pub development_index: f64,
    /// Crop type.
    pub crop: String,
    /// Farm-size class, one of [`FARM_SIZES`].
    pub farm_size: String,
    /// Production in kcal; strictly positive.
    pub production: f64,
}

/// Country-level covariates shared by every record of one country.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountryProfile {
    pub country_id: u32,
    pub country_name: String,
    pub region: String,
    pub development_index: f64,
}

/// Crop-level production total for one country, summed across farm sizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CropTotal {
    pub country_id: u32,
    pub crop: String,
    pub production: f64,
}

/// Validated production panel.
///
/// Construction rejects non-positive production, covariates outside their
/// catalogs, duplicate (country, crop, farm size) cells, and countries whose
/// country-level covariates disagree between records. Estimators can therefore
/// assume a clean table and take the natural log of any production value.
#[derive(Clone, Debug)]
pub struct ProductionTable {
    records: Vec<ProductionRecord>,
    countries: Vec<CountryProfile>,
    crops: Vec<String>,
    farm_sizes: Vec<String>,
}

impl ProductionTable {
    /// Validates records and builds the table along with its level catalogs.
    pub fn new(records: Vec<ProductionRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(FarmdistError::insufficient("production table", 1, 0));
        }

        let mut profiles: HashMap<u32, CountryProfile> = HashMap::new();
        let mut cells: HashSet<(u32, String, String)> = HashSet::new();
        let mut crops: Vec<String> = Vec::new();
        let mut size_ranks: Vec<usize> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            if !record.production.is_finite() {
                return Err(FarmdistError::non_finite("production value"));
            }
            if record.production <= 0.0 {
                return Err(FarmdistError::NonPositiveProduction {
                    index,
                    value: record.production,
                });
            }
            if !record.development_index.is_finite()
                || !(0.0..=1.0).contains(&record.development_index)
            {
                return Err(FarmdistError::invalid_parameter(
                    "development_index",
                    record.development_index,
                    "must lie in [0, 1]",
                ));
            }
            if !REGIONS.contains(&record.region.as_str()) {
                return Err(FarmdistError::UnknownLevel {
                    field: "region",
                    level: record.region.clone(),
                });
            }
            let rank = farm_size_rank(&record.farm_size).ok_or_else(|| {
                FarmdistError::UnknownLevel {
                    field: "farm_size",
                    level: record.farm_size.clone(),
                }
            })?;

            if !cells.insert((record.country_id, record.crop.clone(), record.farm_size.clone())) {
                return Err(FarmdistError::DuplicateCell {
                    country_id: record.country_id,
                    crop: record.crop.clone(),
                    farm_size: record.farm_size.clone(),
                });
            }

            match profiles.entry(record.country_id) {
                Entry::Occupied(existing) => {
                    let profile = existing.get();
                    if profile.country_name != record.country_name {
                        return Err(FarmdistError::InconsistentCountry {
                            country_id: record.country_id,
                            field: "country_name",
                        });
                    }
                    if profile.region != record.region {
                        return Err(FarmdistError::InconsistentCountry {
                            country_id: record.country_id,
                            field: "region",
                        });
                    }
                    if profile.development_index != record.development_index {
                        return Err(FarmdistError::InconsistentCountry {
                            country_id: record.country_id,
                            field: "development_index",
                        });
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(CountryProfile {
                        country_id: record.country_id,
                        country_name: record.country_name.clone(),
                        region: record.region.clone(),
                        development_index: record.development_index,
                    });
                }
            }

            if !crops.contains(&record.crop) {
                crops.push(record.crop.clone());
            }
            if !size_ranks.contains(&rank) {
                size_ranks.push(rank);
            }
        }

        let mut countries: Vec<CountryProfile> = profiles.into_values().collect();
        countries.sort_by_key(|p| p.country_id);
        crops.sort();
        size_ranks.sort_unstable();
        let farm_sizes = size_ranks
            .into_iter()
            .map(|rank| FARM_SIZES[rank].to_string())
            .collect();

        Ok(Self {
            records,
            countries,
            crops,
            farm_sizes,
        })
    }

    /// Number of records in the table.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records. Always false for a validated table.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only view of the underlying records.
    pub fn records(&self) -> &[ProductionRecord] {
        &self.records
    }

    /// Country profiles, sorted by country id.
    pub fn countries(&self) -> &[CountryProfile] {
        &self.countries
    }

    /// Country ids in ascending order.
    pub fn country_ids(&self) -> Vec<u32> {
        self.countries.iter().map(|p| p.country_id).collect()
    }

    /// Distinct crops, sorted alphabetically.
    pub fn crops(&self) -> &[String] {
        &self.crops
    }

    /// Distinct farm-size classes, ordered smallest holdings first.
    pub fn farm_sizes(&self) -> &[String] {
        &self.farm_sizes
    }

    /// Looks up the country-level covariates of one country.
    pub fn country_profile(&self, country_id: u32) -> Option<&CountryProfile> {
        self.countries
            .binary_search_by_key(&country_id, |p| p.country_id)
            .ok()
            .map(|idx| &self.countries[idx])
    }

    /// Mean production across all records, in natural units.
    pub fn mean_production(&self) -> f64 {
        let total: f64 = self.records.iter().map(|r| r.production).sum();
        total / self.records.len() as f64
    }

    /// Crop-level totals per country, summed across farm sizes.
    pub fn crop_totals(&self) -> Vec<CropTotal> {
        let mut totals: HashMap<(u32, String), f64> = HashMap::new();
        for record in &self.records {
            *totals
                .entry((record.country_id, record.crop.clone()))
                .or_insert(0.0) += record.production;
        }
        let mut out: Vec<CropTotal> = totals
            .into_iter()
            .map(|((country_id, crop), production)| CropTotal {
                country_id,
                crop,
                production,
            })
            .collect();
        out.sort_by(|a, b| (a.country_id, &a.crop).cmp(&(b.country_id, &b.crop)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(country_id: u32, crop: &str, farm_size: &str, production: f64) -> ProductionRecord {
        ProductionRecord {
            country_id,
            country_name: format!("Country {country_id}"),
            region: REGIONS[country_id as usize % REGIONS.len()].to_string(),
            development_index: 0.1 * country_id as f64,
            crop: crop.to_string(),
            farm_size: farm_size.to_string(),
            production,
        }
    }

    #[test]
    fn builds_catalogs_in_canonical_order() {
        let table = ProductionTable::new(vec![
            record(2, "wheat", "50+", 5.0),
            record(2, "rice", "0-1", 2.0),
            record(1, "rice", "2-5", 3.0),
        ])
        .expect("valid table");

        assert_eq!(table.len(), 3);
        assert_eq!(table.country_ids(), vec![1, 2]);
        assert_eq!(table.crops(), ["rice".to_string(), "wheat".to_string()]);
        // Farm sizes are ordered by holding size, not insertion order.
        assert_eq!(
            table.farm_sizes(),
            ["0-1".to_string(), "2-5".to_string(), "50+".to_string()]
        );
    }

    #[test]
    fn rejects_non_positive_production() {
        let result = ProductionTable::new(vec![record(1, "wheat", "0-1", 0.0)]);
        assert!(matches!(
            result,
            Err(FarmdistError::NonPositiveProduction { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_cells() {
        let result = ProductionTable::new(vec![
            record(1, "wheat", "0-1", 1.0),
            record(1, "wheat", "0-1", 2.0),
        ]);
        assert!(matches!(result, Err(FarmdistError::DuplicateCell { .. })));
    }

    #[test]
    fn rejects_unknown_farm_size() {
        let mut bad = record(1, "wheat", "0-1", 1.0);
        bad.farm_size = "100+".to_string();
        let result = ProductionTable::new(vec![bad]);
        assert!(matches!(
            result,
            Err(FarmdistError::UnknownLevel { field: "farm_size", .. })
        ));
    }

    #[test]
    fn rejects_conflicting_country_covariates() {
        let mut second = record(1, "rice", "1-2", 1.0);
        second.development_index = 0.9;
        let result = ProductionTable::new(vec![record(1, "wheat", "0-1", 1.0), second]);
        assert!(matches!(
            result,
            Err(FarmdistError::InconsistentCountry {
                field: "development_index",
                ..
            })
        ));
    }

    #[test]
    fn crop_totals_sum_across_farm_sizes() {
        let table = ProductionTable::new(vec![
            record(1, "wheat", "0-1", 1.5),
            record(1, "wheat", "1-2", 2.5),
            record(1, "rice", "0-1", 3.0),
        ])
        .unwrap();

        let totals = table.crop_totals();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].crop, "rice");
        assert_eq!(totals[0].production, 3.0);
        assert_eq!(totals[1].crop, "wheat");
        assert_eq!(totals[1].production, 4.0);
    }
}
