//! ScyllaDB schema creation

use scylla::Session;

use eca_core::StateError;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), StateError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| StateError::Unavailable(format!("failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), StateError> {
    // Turns: status is its own column so updates can be conditional on it;
    // everything else rides in the JSON body.
    let turns_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.turns (
            turn_id UUID,
            session_id UUID,
            seq BIGINT,
            status TEXT,
            body_json TEXT,
            updated_at TIMESTAMP,
            PRIMARY KEY (turn_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(turns_table, &[])
        .await
        .map_err(|e| StateError::Unavailable(format!("failed to create turns table: {}", e)))?;

    // Messages: transcript entries clustered by (seq, role) so history reads
    // come back in conversation order without sorting. Role DESC puts the
    // user utterance before the agent reply within one turn.
    let messages_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.messages (
            session_id UUID,
            seq BIGINT,
            role TEXT,
            turn_id UUID,
            text TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY ((session_id), seq, role)
        ) WITH CLUSTERING ORDER BY (seq ASC, role DESC)
    "#,
        keyspace
    );

    session
        .query_unpaged(messages_table, &[])
        .await
        .map_err(|e| StateError::Unavailable(format!("failed to create messages table: {}", e)))?;

    Ok(())
}
