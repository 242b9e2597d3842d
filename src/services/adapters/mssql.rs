use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server over the TDS protocol. The driver binds `@P1..@Pn`, so the
/// canonical `?` placeholders are rewritten to that form.
pub struct MsSqlAdapter {
    engine: String,
    config: Config,
    client: Mutex<Option<TdsClient>>,
}

impl MsSqlAdapter {
    pub fn new(source: &SourceConfig) -> ApiResult<Self> {
        let mut config = Config::new();
        config.host(source.require("host")?);
        config.port(
            source
                .get("port")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1433),
        );
        if let Some(database) = source.get("database") {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(
            source.require("user")?,
            source.require("password")?,
        ));
        config.trust_cert();

        Ok(Self {
            engine: source.engine.clone(),
            config,
            client: Mutex::new(None),
        })
    }

    async fn open_client(&self) -> ApiResult<TdsClient> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;
        tcp.set_nodelay(true)
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;
        Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))
    }
}

/// Owned parameter storage the TDS driver can borrow from.
#[derive(Debug)]
enum TdsParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TdsParam {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => TdsParam::Null,
            Value::Bool(b) => TdsParam::Bool(*b),
            Value::Number(n) if n.is_f64() => TdsParam::Float(n.as_f64().unwrap_or_default()),
            Value::Number(n) => TdsParam::Int(n.as_i64().unwrap_or_default()),
            Value::String(s) => TdsParam::Text(s.clone()),
            other => TdsParam::Text(other.to_string()),
        }
    }
}

impl ToSql for TdsParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TdsParam::Null => ColumnData::String(None),
            TdsParam::Bool(b) => ColumnData::Bit(Some(*b)),
            TdsParam::Int(i) => ColumnData::I64(Some(*i)),
            TdsParam::Float(f) => ColumnData::F64(Some(*f)),
            TdsParam::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
        }
    }
}

fn cell_to_json(cell: ColumnData<'_>) -> Value {
    match cell {
        ColumnData::Bit(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|x| Value::from(x as i64)).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|x| Value::from(x as f64)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| {
                let scaled = n.value() as f64 / 10f64.powi(i32::from(n.scale()));
                Value::from(scaled)
            })
            .unwrap_or(Value::Null),
        // Temporal and binary values pass through in debug form; the
        // engine-native type name is still recorded per column.
        other => Value::String(format!("{other:?}")),
    }
}

#[async_trait]
impl EngineAdapter for MsSqlAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_client().await?);
        }
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let native_sql = placeholder::numbered(sql, "@P");
        let bound: Vec<TdsParam> = params.iter().map(TdsParam::from_json).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p as &dyn ToSql).collect();

        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_client().await?);
        }
        let mut client = guard.take().expect("client initialized above");

        let start = Instant::now();
        let into_result = {
            let query_result = client.query(native_sql.as_str(), &refs).await;
            let stream = match query_result {
                Ok(stream) => stream,
                Err(e) => {
                    // The connection may be poisoned after a protocol error;
                    // drop it (by not returning it to the guard) so the next
                    // call reconnects.
                    return Err(ApiError::query_error(&self.engine, e));
                }
            };
            stream.into_first_result().await
        };
        *guard = Some(client);
        let raw_rows = into_result.map_err(|e| ApiError::query_error(&self.engine, e))?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let mut columns: Vec<String> = Vec::new();
        let mut column_types = HashMap::new();
        let mut rows = Vec::with_capacity(raw_rows.len());

        for row in raw_rows {
            if columns.is_empty() {
                for col in row.columns() {
                    columns.push(col.name().to_string());
                    column_types
                        .insert(col.name().to_string(), format!("{:?}", col.column_type()));
                }
            }
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, cell) in row.into_iter().enumerate() {
                if let Some(name) = columns.get(idx) {
                    map.insert(name.clone(), cell_to_json(cell));
                }
            }
            rows.push(map);
        }

        Ok(AdapterResult { rows, columns, column_types, execution_ms, metadata: HashMap::new() })
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(HEALTH_TIMEOUT, self.execute("SELECT 1", &[]))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        let mut guard = self.client.lock().await;
        // Dropping the client closes the TDS session; repeated calls see an
        // empty slot.
        guard.take();
    }
}
