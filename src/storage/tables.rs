use redb::TableDefinition;

/// Asset metadata: asset id -> AssetRecord (msgpack). Payload bytes live in the object store.
pub const ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");

/// Boards: board id -> Board (msgpack)
pub const BOARDS: TableDefinition<&str, &[u8]> = TableDefinition::new("boards");
