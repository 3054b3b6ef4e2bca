//! 要素分类
//!
//! - `TreeId`: 每个类别一棵空间索引，按枚举下标存放在定长数组中
//! - 瓦片级分类：按原始标签 (feature_type / feature_value / class) 拆分
//! - 网格级分类：POI 按超类拆分，并生成地点+地标、当前启用类别两个并集

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::feature::FeatureRef;

/// 空间索引类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TreeId {
    Roads,
    RoadsAndPaths,
    Intersections,
    Entrances,
    Crossings,
    Pois,
    TransitStops,
    Interpolations,
    InformationPois,
    ObjectPois,
    PlacePois,
    LandmarkPois,
    MobilityPois,
    SafetyPois,
    PlacesAndLandmarks,
    SelectedSuperCategories,
    SettlementCity,
    SettlementTown,
    SettlementVillage,
    SettlementHamlet,
    SettlementAreas,
}

impl TreeId {
    pub const COUNT: usize = 21;

    pub const ALL: [TreeId; TreeId::COUNT] = [
        TreeId::Roads,
        TreeId::RoadsAndPaths,
        TreeId::Intersections,
        TreeId::Entrances,
        TreeId::Crossings,
        TreeId::Pois,
        TreeId::TransitStops,
        TreeId::Interpolations,
        TreeId::InformationPois,
        TreeId::ObjectPois,
        TreeId::PlacePois,
        TreeId::LandmarkPois,
        TreeId::MobilityPois,
        TreeId::SafetyPois,
        TreeId::PlacesAndLandmarks,
        TreeId::SelectedSuperCategories,
        TreeId::SettlementCity,
        TreeId::SettlementTown,
        TreeId::SettlementVillage,
        TreeId::SettlementHamlet,
        TreeId::SettlementAreas,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 由网格级分类派生、不从瓦片直接合并的类别
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            TreeId::InformationPois
                | TreeId::ObjectPois
                | TreeId::PlacePois
                | TreeId::LandmarkPois
                | TreeId::MobilityPois
                | TreeId::SafetyPois
                | TreeId::PlacesAndLandmarks
                | TreeId::SelectedSuperCategories
        )
    }
}

/// 每个类别一个要素集合
#[derive(Debug, Clone, Default)]
pub struct Collections {
    slots: [Vec<FeatureRef>; TreeId::COUNT],
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TreeId) -> &[FeatureRef] {
        &self.slots[id.index()]
    }

    pub fn push(&mut self, id: TreeId, feature: FeatureRef) {
        self.slots[id.index()].push(feature);
    }

    pub fn extend_from(&mut self, id: TreeId, features: &[FeatureRef]) {
        self.slots[id.index()].extend(features.iter().cloned());
    }

    /// 追加尚未存在 (按对象身份) 的要素
    fn union_from(&mut self, id: TreeId, features: &[FeatureRef]) {
        for feature in features {
            let slot = &mut self.slots[id.index()];
            if !slot.iter().any(|f| Arc::ptr_eq(f, feature)) {
                slot.push(feature.clone());
            }
        }
    }

    pub fn take(&mut self, id: TreeId) -> Vec<FeatureRef> {
        std::mem::take(&mut self.slots[id.index()])
    }

    pub fn clear(&mut self, id: TreeId) {
        self.slots[id.index()].clear();
    }

    pub fn total_len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

// ============================================================================
// 超类
// ============================================================================

/// 调用方启用的超类组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledCategories {
    pub places_and_landmarks: bool,
    pub mobility: bool,
}

impl Default for EnabledCategories {
    fn default() -> Self {
        Self {
            places_and_landmarks: true,
            mobility: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuperCategory {
    Information,
    Object,
    Place,
    Landmark,
    Mobility,
    Safety,
}

impl SuperCategory {
    pub const ALL: [SuperCategory; 6] = [
        SuperCategory::Information,
        SuperCategory::Object,
        SuperCategory::Place,
        SuperCategory::Landmark,
        SuperCategory::Mobility,
        SuperCategory::Safety,
    ];

    pub fn tree_id(self) -> TreeId {
        match self {
            SuperCategory::Information => TreeId::InformationPois,
            SuperCategory::Object => TreeId::ObjectPois,
            SuperCategory::Place => TreeId::PlacePois,
            SuperCategory::Landmark => TreeId::LandmarkPois,
            SuperCategory::Mobility => TreeId::MobilityPois,
            SuperCategory::Safety => TreeId::SafetyPois,
        }
    }

    /// 属于该超类的 feature_type / feature_value
    pub fn elements(self) -> &'static [&'static str] {
        match self {
            SuperCategory::Information => &[
                "information", "assembly_point", "fire_extinguisher", "defibrillator", "guide",
                "water", "fire_hose", "fire_flapper", "information_point", "wetland", "mud",
                "access_point", "life_ring", "generic_info",
            ],
            SuperCategory::Object => &[
                "turntable", "survey_point", "snow_net", "silo", "mast", "bird_hide",
                "transformer_tower", "generic_object", "waste_basket", "signal", "rock", "crane",
                "milestone", "water_tank", "vending_machine", "terminal", "water_tap",
                "water_well", "cross", "speed_camera", "siren", "pylon", "flagpole",
                "boundary_stone", "shed", "firepit", "bench", "stone", "surveillance",
                "wayside_shrine", "wayside_cross", "tomb", "traffic_signals", "hut", "bollard",
                "block", "waste_disposal", "photo_booth", "bbq",
            ],
            SuperCategory::Place => &[
                "post_box", "telephone", "shop", "newsagent", "mobile_phone", "garden_centre",
                "florist", "bag", "pastry", "deli", "beverages", "alcohol", "travel_agent",
                "newspaper", "playground", "book_store", "generic_place", "animal_shelter",
                "nursing_home", "dentist", "language_school", "public_bookcase", "biergarten",
                "retail", "office", "hotel", "camp_site", "toys", "laundry", "funeral_directors",
                "dry_cleaning", "copyshop", "apartment", "pet", "gift", "books", "bookmaker",
                "photo", "craft", "antiques", "tattoo", "cosmetics", "jewelry", "boutique", "tea",
                "coffee", "pitch", "dance", "amusement_arcade", "restaurant", "cafe", "fast_food",
                "pub", "bar",
            ],
            SuperCategory::Landmark => &[
                "waterfall", "boatyard", "theme_park", "generator", "beach", "works",
                "telescope", "pier", "observatory", "reservoir", "monument", "battlefield",
                "post_office", "planetarium", "social_centre", "prison", "courthouse", "bridge",
                "tower", "attraction", "zoo", "gallery", "artwork", "water_tower", "campanile",
                "sports_centre", "fitness_centre", "village_green", "memorial", "synagogue",
                "mosque", "chapel", "cathedral", "church", "train_terminal", "college",
                "arts_centre", "hospital", "fountain", "conference_centre", "viewpoint",
                "supermarket", "peak", "lighthouse", "park", "museum", "library", "school",
                "university", "castle", "stadium",
            ],
            SuperCategory::Mobility => &[
                "toll_booth", "lift_gate", "lift", "steps", "unmanaged_crossing", "pharmacy",
                "food_court", "toilets", "chemist", "checkpoint", "kissing_gate", "fuel",
                "car_rental", "pedestrianised_area", "escalator", "shelter", "subway_entrance",
                "turnstile", "swing_gate", "stile", "car_sharing", "atm", "drinking_water",
                "platform", "crossing", "elevator", "bureau_de_change", "stairs",
                "bicycle_rental", "bicycle_parking", "bus_stop", "tram_stop", "subway",
                "help_point", "taxi", "gate",
            ],
            SuperCategory::Safety => &[
                "motorcycle_barrier", "kent_carriage_gap", "shared_space", "construction",
                "cliff", "training_area", "jersey_barrier", "cycle_barrier",
                "construction_site", "ridge", "dyke", "debris", "road_works", "lock_gate",
                "sinkhole", "ambulance_station", "cattle_grid", "generic_hazard", "danger_area",
                "chain", "parking_entrance", "parking_space", "parking", "motorcycle_parking",
            ],
        }
    }

    pub fn contains(self, feature_type: Option<&str>, feature_value: Option<&str>) -> bool {
        let elements = self.elements();
        feature_type.is_some_and(|t| elements.contains(&t))
            || feature_value.is_some_and(|v| elements.contains(&v))
    }
}

// ============================================================================
// 瓦片级分类
// ============================================================================

const TRANSIT_STOPS: [&str; 4] = ["bus_stop", "tram_stop", "station", "ferry_terminal"];

/// 聚落等级 (点要素)
pub fn settlement_tier(feature_value: &str) -> Option<TreeId> {
    match feature_value {
        "city" => Some(TreeId::SettlementCity),
        "town" | "borough" => Some(TreeId::SettlementTown),
        "village" | "suburb" => Some(TreeId::SettlementVillage),
        "hamlet" | "quarter" | "neighbourhood" | "city_block" => Some(TreeId::SettlementHamlet),
        _ => None,
    }
}

/// 将瓦片的原始要素 (不含路网) 分入各类别
///
/// POI 包含除 highway / gd_entrance_list / 插值点以外的所有要素，再并入公交站与人行横道。
pub fn classify_tile_features(features: &[FeatureRef], collections: &mut Collections) {
    let mut transit = Vec::new();
    let mut crossings = Vec::new();

    for feature in features {
        let feature_type = feature.foreign_tag("feature_type");
        let feature_value = feature.foreign_tag("feature_value");
        let is_edge_point = feature.tag("class") == Some("edgePoint");

        if is_edge_point {
            collections.push(TreeId::Interpolations, feature.clone());
            continue;
        }

        if matches!(feature_type, Some("entrance") | Some("gd_entrance_list")) {
            collections.push(TreeId::Entrances, feature.clone());
        }
        if feature_type == Some("highway") && feature_value == Some("crossing") {
            crossings.push(feature.clone());
        }
        if feature_value.is_some_and(|v| TRANSIT_STOPS.contains(&v)) {
            transit.push(feature.clone());
        }
        if let (Some("place"), Some(value)) = (feature_type, feature_value) {
            if feature.geometry.is_polygonal() {
                collections.push(TreeId::SettlementAreas, feature.clone());
            } else if let Some(tier) = settlement_tier(value) {
                collections.push(tier, feature.clone());
            }
        }
        if !matches!(feature_type, Some("highway") | Some("gd_entrance_list")) {
            collections.push(TreeId::Pois, feature.clone());
        }
    }

    collections.extend_from(TreeId::TransitStops, &transit);
    collections.extend_from(TreeId::Crossings, &crossings);
    collections.union_from(TreeId::Pois, &transit);
    collections.union_from(TreeId::Pois, &crossings);
}

/// 网格级 POI 分类：超类子集与派生并集
pub fn classify_pois(collections: &mut Collections, enabled: &EnabledCategories) {
    for id in TreeId::ALL.iter().filter(|id| id.is_derived()) {
        collections.clear(*id);
    }

    let pois = collections.get(TreeId::Pois).to_vec();
    for feature in &pois {
        let feature_type = feature.foreign_tag("feature_type");
        let feature_value = feature.foreign_tag("feature_value");
        for category in SuperCategory::ALL {
            if category.contains(feature_type, feature_value) {
                collections.push(category.tree_id(), feature.clone());
            }
        }
    }

    let places = collections.get(TreeId::PlacePois).to_vec();
    let landmarks = collections.get(TreeId::LandmarkPois).to_vec();
    collections.extend_from(TreeId::PlacesAndLandmarks, &places);
    collections.extend_from(TreeId::PlacesAndLandmarks, &landmarks);

    if enabled.places_and_landmarks {
        collections.extend_from(TreeId::SelectedSuperCategories, &places);
        collections.extend_from(TreeId::SelectedSuperCategories, &landmarks);
    }
    if enabled.mobility {
        let mobility = collections.get(TreeId::MobilityPois).to_vec();
        collections.extend_from(TreeId::SelectedSuperCategories, &mobility);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, Geometry};
    use crate::types::LngLat;

    fn raw(feature_type: &str, feature_value: &str) -> FeatureRef {
        Arc::new(
            Feature::new(Geometry::Point(LngLat::new(0.0, 0.0)))
                .with_foreign("feature_type", feature_type)
                .with_foreign("feature_value", feature_value),
        )
    }

    #[test]
    fn test_tree_id_order() {
        for (i, id) in TreeId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_classify_tile_features() {
        let bus_stop = raw("highway", "bus_stop");
        let crossing = raw("highway", "crossing");
        let entrance = raw("gd_entrance_list", "main");
        let cafe = raw("amenity", "cafe");
        let station = raw("railway", "station");
        let edge = Arc::new(Feature::new(Geometry::Point(LngLat::default())).with_tag("class", "edgePoint"));
        let village = raw("place", "village");

        let mut collections = Collections::new();
        classify_tile_features(
            &[bus_stop, crossing, entrance, cafe, station, edge, village],
            &mut collections,
        );

        assert_eq!(collections.get(TreeId::TransitStops).len(), 2);
        assert_eq!(collections.get(TreeId::Crossings).len(), 1);
        assert_eq!(collections.get(TreeId::Entrances).len(), 1);
        assert_eq!(collections.get(TreeId::Interpolations).len(), 1);
        assert_eq!(collections.get(TreeId::SettlementVillage).len(), 1);
        // cafe + station + village + bus_stop + crossing，station 不重复
        assert_eq!(collections.get(TreeId::Pois).len(), 5);
    }

    #[test]
    fn test_classify_pois_and_selection() {
        let mut collections = Collections::new();
        classify_tile_features(
            &[raw("amenity", "cafe"), raw("tourism", "museum"), raw("highway", "bus_stop")],
            &mut collections,
        );

        classify_pois(
            &mut collections,
            &EnabledCategories {
                places_and_landmarks: false,
                mobility: true,
            },
        );
        assert_eq!(collections.get(TreeId::PlacePois).len(), 1);
        assert_eq!(collections.get(TreeId::LandmarkPois).len(), 1);
        assert_eq!(collections.get(TreeId::MobilityPois).len(), 1);
        assert_eq!(collections.get(TreeId::PlacesAndLandmarks).len(), 2);
        assert_eq!(collections.get(TreeId::SelectedSuperCategories).len(), 1);

        // 重新分类不会累加
        classify_pois(&mut collections, &EnabledCategories::default());
        assert_eq!(collections.get(TreeId::PlacePois).len(), 1);
        assert_eq!(collections.get(TreeId::SelectedSuperCategories).len(), 3);
    }

    #[test]
    fn test_settlement_tiers() {
        assert_eq!(settlement_tier("borough"), Some(TreeId::SettlementTown));
        assert_eq!(settlement_tier("neighbourhood"), Some(TreeId::SettlementHamlet));
        assert_eq!(settlement_tier("island"), None);
    }
}
