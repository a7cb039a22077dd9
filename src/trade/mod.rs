//! Trade records: the log record type of the shop trade log
//!
//! A trade record describes one or more identical, consecutive trades of a
//! player with a shop. Records are immutable snapshots taken when the trade
//! happened; later changes to the player, shop or items are not reflected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::record::{BucketTimeZone, CsvRecord, LogRecord, SaveOptions, SqlRecord, SqlValue};
use crate::scheduler::SingleWriterLogger;
use crate::writer::csv::escape_newlines;

/// Engine persisting trade records.
pub type TradeLogger = SingleWriterLogger<TradeRecord>;

/// CSV header of the trade log.
pub const CSV_HEADER: [&str; 21] = [
    "time",
    "player_uuid",
    "player_name",
    "shop_uuid",
    "shop_type",
    "shop_world",
    "shop_x",
    "shop_y",
    "shop_z",
    "shop_owner_uuid",
    "shop_owner_name",
    "item1_type",
    "item1_amount",
    "item1_metadata",
    "item2_type",
    "item2_amount",
    "item2_metadata",
    "result_item_type",
    "result_item_amount",
    "result_item_metadata",
    "trade_count",
];

/// Table of the SQLite trade log. Times are stored in UTC.
pub const SQL_CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS trade (\
    time DATETIME NOT NULL, \
    player_uuid CHARACTER(36) NOT NULL, \
    player_name VARCHAR(16) NOT NULL, \
    shop_uuid CHARACTER(36) NOT NULL, \
    shop_type VARCHAR(32) NOT NULL, \
    shop_world VARCHAR(30), \
    shop_x INTEGER NOT NULL, \
    shop_y INTEGER NOT NULL, \
    shop_z INTEGER NOT NULL, \
    shop_owner_uuid CHARACTER(36), \
    shop_owner_name VARCHAR(16), \
    item_1_type VARCHAR(64) NOT NULL, \
    item_1_amount TINYINT UNSIGNED NOT NULL, \
    item_1_metadata TEXT NOT NULL, \
    item_2_type VARCHAR(64), \
    item_2_amount TINYINT UNSIGNED, \
    item_2_metadata TEXT, \
    result_item_type VARCHAR(64) NOT NULL, \
    result_item_amount TINYINT UNSIGNED NOT NULL, \
    result_item_metadata TEXT NOT NULL, \
    trade_count SMALLINT UNSIGNED NOT NULL\
)";

/// Insert statement of the SQLite trade log.
pub const SQL_INSERT: &str = "INSERT INTO trade (\
    time, player_uuid, player_name, \
    shop_uuid, shop_type, shop_world, shop_x, shop_y, shop_z, shop_owner_uuid, shop_owner_name, \
    item_1_type, item_1_amount, item_1_metadata, \
    item_2_type, item_2_amount, item_2_metadata, \
    result_item_type, result_item_amount, result_item_metadata, \
    trade_count\
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)";

/// A player, identified by unique id and last known name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    unique_id: Uuid,
    name: String,
}

impl PlayerRecord {
    pub fn new(unique_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            unique_id,
            name: name.into(),
        }
    }

    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A shop at the time of the trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopRecord {
    unique_id: Uuid,
    type_id: String,
    /// `None` for shops that are not placed in a world.
    world_name: Option<String>,
    x: i32,
    y: i32,
    z: i32,
    /// `None` for shops without an owner (admin shops).
    owner: Option<PlayerRecord>,
}

impl ShopRecord {
    pub fn new(
        unique_id: Uuid,
        type_id: impl Into<String>,
        world_name: Option<String>,
        x: i32,
        y: i32,
        z: i32,
        owner: Option<PlayerRecord>,
    ) -> Self {
        Self {
            unique_id,
            type_id: type_id.into(),
            world_name,
            x,
            y,
            z,
            owner,
        }
    }

    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn world_name(&self) -> Option<&str> {
        self.world_name.as_deref()
    }

    pub fn position(&self) -> (i32, i32, i32) {
        (self.x, self.y, self.z)
    }

    pub fn owner(&self) -> Option<&PlayerRecord> {
        self.owner.as_ref()
    }
}

/// An item stack involved in a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    item_type: String,
    amount: u32,
    /// Extended item data, serialized only when enabled.
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl ItemRecord {
    pub fn new(item_type: impl Into<String>, amount: u32) -> Self {
        Self {
            item_type: item_type.into(),
            amount,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Compact JSON of the metadata, or `None` if disabled or empty.
    fn metadata_field(&self, options: &SaveOptions) -> Option<String> {
        if !options.log_item_metadata || self.metadata.is_empty() {
            return None;
        }
        serde_json::to_string(&self.metadata).ok()
    }

    fn push_values(item: Option<&ItemRecord>, options: &SaveOptions, values: &mut Vec<SqlValue>) {
        match item {
            Some(item) => {
                values.push(SqlValue::Text(item.item_type.clone()));
                values.push(SqlValue::Integer(i64::from(item.amount)));
                values.push(SqlValue::Text(item.metadata_field(options).unwrap_or_default()));
            }
            None => values.extend([SqlValue::Null, SqlValue::Null, SqlValue::Null]),
        }
    }

    fn push_fields(item: Option<&ItemRecord>, options: &SaveOptions, fields: &mut Vec<Option<String>>) {
        match item {
            Some(item) => {
                fields.push(Some(escape_newlines(&item.item_type).into_owned()));
                fields.push(Some(item.amount.to_string()));
                fields.push(item.metadata_field(options));
            }
            None => fields.extend([None, None, None]),
        }
    }
}

/// One or more identical trades of a player with a shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    timestamp: DateTime<Utc>,
    player: PlayerRecord,
    shop: ShopRecord,
    result_item: ItemRecord,
    item1: ItemRecord,
    item2: Option<ItemRecord>,
    trade_count: u32,
}

impl TradeRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        player: PlayerRecord,
        shop: ShopRecord,
        result_item: ItemRecord,
        item1: ItemRecord,
        item2: Option<ItemRecord>,
        trade_count: u32,
    ) -> Self {
        Self {
            timestamp,
            player,
            shop,
            result_item,
            item1,
            item2,
            trade_count: trade_count.max(1),
        }
    }

    pub fn player(&self) -> &PlayerRecord {
        &self.player
    }

    pub fn shop(&self) -> &ShopRecord {
        &self.shop
    }

    pub fn result_item(&self) -> &ItemRecord {
        &self.result_item
    }

    pub fn item1(&self) -> &ItemRecord {
        &self.item1
    }

    pub fn item2(&self) -> Option<&ItemRecord> {
        self.item2.as_ref()
    }

    /// Number of identical trades this record stands for (at least 1).
    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }
}

impl LogRecord for TradeRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl CsvRecord for TradeRecord {
    fn csv_header() -> &'static [&'static str] {
        &CSV_HEADER
    }

    fn csv_fields(&self, options: &SaveOptions, time_zone: BucketTimeZone) -> Vec<Option<String>> {
        let shop = &self.shop;
        let owner = shop.owner.as_ref();

        let mut fields = Vec::with_capacity(CSV_HEADER.len());
        fields.push(Some(time_zone.time_of(self.timestamp).format("%H:%M:%S").to_string()));
        fields.push(Some(self.player.unique_id.to_string()));
        fields.push(Some(escape_newlines(&self.player.name).into_owned()));
        fields.push(Some(shop.unique_id.to_string()));
        fields.push(Some(escape_newlines(&shop.type_id).into_owned()));
        fields.push(shop.world_name.as_deref().map(|world| escape_newlines(world).into_owned()));
        fields.push(Some(shop.x.to_string()));
        fields.push(Some(shop.y.to_string()));
        fields.push(Some(shop.z.to_string()));
        fields.push(owner.map(|o| o.unique_id.to_string()));
        fields.push(owner.map(|o| escape_newlines(&o.name).into_owned()));
        ItemRecord::push_fields(Some(&self.item1), options, &mut fields);
        ItemRecord::push_fields(self.item2.as_ref(), options, &mut fields);
        ItemRecord::push_fields(Some(&self.result_item), options, &mut fields);
        fields.push(Some(self.trade_count.to_string()));
        fields
    }
}

impl SqlRecord for TradeRecord {
    fn sql_create_table() -> &'static str {
        SQL_CREATE_TABLE
    }

    fn sql_insert() -> &'static str {
        SQL_INSERT
    }

    fn sql_values(&self, options: &SaveOptions) -> Vec<SqlValue> {
        let shop = &self.shop;
        let owner = shop.owner.as_ref();

        let mut values = Vec::with_capacity(CSV_HEADER.len());
        values.push(SqlValue::Text(self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()));
        values.push(SqlValue::Text(self.player.unique_id.to_string()));
        values.push(SqlValue::Text(self.player.name.clone()));
        values.push(SqlValue::Text(shop.unique_id.to_string()));
        values.push(SqlValue::Text(shop.type_id.clone()));
        values.push(shop.world_name.clone().into());
        values.push(SqlValue::Integer(i64::from(shop.x)));
        values.push(SqlValue::Integer(i64::from(shop.y)));
        values.push(SqlValue::Integer(i64::from(shop.z)));
        values.push(owner.map(|o| o.unique_id.to_string()).into());
        values.push(owner.map(|o| o.name.clone()).into());
        ItemRecord::push_values(Some(&self.item1), options, &mut values);
        ItemRecord::push_values(self.item2.as_ref(), options, &mut values);
        ItemRecord::push_values(Some(&self.result_item), options, &mut values);
        values.push(SqlValue::Integer(i64::from(self.trade_count)));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::CsvFormatter;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample(item2: Option<ItemRecord>, owner: Option<PlayerRecord>) -> TradeRecord {
        let mut metadata = Map::new();
        metadata.insert("display_name".to_string(), json!("Sword of \"Doom\""));

        TradeRecord::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 14, 5, 9).unwrap(),
            PlayerRecord::new(Uuid::nil(), "alice"),
            ShopRecord::new(Uuid::nil(), "villager", Some("world".to_string()), 10, 64, -3, owner),
            ItemRecord::new("DIAMOND_SWORD", 1).with_metadata(metadata),
            ItemRecord::new("EMERALD", 12),
            item2,
            2,
        )
    }

    #[test]
    fn test_fields_match_header_width() {
        let record = sample(None, None);
        let fields = record.csv_fields(&SaveOptions::default(), BucketTimeZone::Utc);
        assert_eq!(fields.len(), TradeRecord::csv_header().len());
    }

    #[test]
    fn test_time_column_and_absent_values() {
        let record = sample(None, None);
        let fields = record.csv_fields(&SaveOptions::default(), BucketTimeZone::Utc);

        assert_eq!(fields[0].as_deref(), Some("14:05:09"));
        assert_eq!(fields[2].as_deref(), Some("alice"));
        assert_eq!(fields[5].as_deref(), Some("world"));
        assert_eq!(fields[8].as_deref(), Some("-3"));
        // No owner, no second item
        assert_eq!(fields[9], None);
        assert_eq!(fields[10], None);
        assert_eq!(&fields[14..17], &[None, None, None]);
        assert_eq!(fields[20].as_deref(), Some("2"));
    }

    #[test]
    fn test_owner_and_second_item_columns() {
        let owner = PlayerRecord::new(Uuid::new_v4(), "bob");
        let record = sample(Some(ItemRecord::new("BOOK", 3)), Some(owner.clone()));
        let fields = record.csv_fields(&SaveOptions::default(), BucketTimeZone::Utc);

        assert_eq!(fields[9], Some(owner.unique_id().to_string()));
        assert_eq!(fields[10].as_deref(), Some("bob"));
        assert_eq!(fields[14].as_deref(), Some("BOOK"));
        assert_eq!(fields[15].as_deref(), Some("3"));
    }

    #[test]
    fn test_metadata_only_when_enabled() {
        let record = sample(None, None);

        let disabled = record.csv_fields(&SaveOptions { log_item_metadata: false }, BucketTimeZone::Utc);
        assert_eq!(disabled[19], None);

        let enabled = record.csv_fields(&SaveOptions { log_item_metadata: true }, BucketTimeZone::Utc);
        assert_eq!(
            enabled[19].as_deref(),
            Some(r#"{"display_name":"Sword of \"Doom\""}"#)
        );
        // Empty metadata stays empty even when enabled
        assert_eq!(enabled[13], None);
    }

    #[test]
    fn test_metadata_json_is_only_quoted() {
        let record = sample(None, None);
        let csv = CsvFormatter::new().escape_newlines(false);
        let line = csv.format_record(record.csv_fields(&SaveOptions { log_item_metadata: true }, BucketTimeZone::Utc));

        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(r#""{""display_name"":""Sword of \""Doom\""""}""#));
    }

    #[test]
    fn test_free_text_fields_are_single_line() {
        let owner = PlayerRecord::new(Uuid::nil(), "line\nbreak");
        let record = TradeRecord::new(
            Utc::now(),
            PlayerRecord::new(Uuid::nil(), "multi\nline"),
            ShopRecord::new(Uuid::nil(), "sign\r", Some("C:\\worlds".to_string()), 0, 0, 0, Some(owner)),
            ItemRecord::new("STONE", 1),
            ItemRecord::new("DIRT", 1),
            None,
            1,
        );
        let fields = record.csv_fields(&SaveOptions::default(), BucketTimeZone::Utc);

        assert_eq!(fields[2].as_deref(), Some(r"multi\nline"));
        assert_eq!(fields[4].as_deref(), Some(r"sign\r"));
        assert_eq!(fields[5].as_deref(), Some(r"C:\\worlds"));
        assert_eq!(fields[10].as_deref(), Some(r"line\nbreak"));
        assert!(fields.iter().flatten().all(|field| !field.contains(['\n', '\r'])));
    }

    #[test]
    fn test_trade_count_is_at_least_one() {
        let record = TradeRecord::new(
            Utc::now(),
            PlayerRecord::new(Uuid::nil(), "p"),
            ShopRecord::new(Uuid::nil(), "sign", None, 0, 0, 0, None),
            ItemRecord::new("STONE", 1),
            ItemRecord::new("DIRT", 1),
            None,
            0,
        );
        assert_eq!(record.trade_count(), 1);
        assert_eq!(record.shop().world_name(), None);
    }

    #[test]
    fn test_sql_values_match_insert_parameters() {
        let record = sample(None, None);
        let values = record.sql_values(&SaveOptions::default());

        assert_eq!(values.len(), SQL_INSERT.matches('?').count());
        assert_eq!(values[0], SqlValue::Text("2024-06-01 14:05:09".to_string()));
        assert_eq!(values[8], SqlValue::Integer(-3));
        assert_eq!(values[9], SqlValue::Null);
        // Metadata columns of present items are never null
        assert_eq!(values[13], SqlValue::Text(String::new()));
        assert_eq!(&values[14..17], &[SqlValue::Null, SqlValue::Null, SqlValue::Null]);
        assert_eq!(values[20], SqlValue::Integer(2));
    }

    #[test]
    fn test_serde_roundtrip_keeps_record() {
        let record = sample(Some(ItemRecord::new("BOOK", 3)), None);
        let json = serde_json::to_string(&record).unwrap();
        let back: TradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
