// 该文件是 Loufang （楼房） 项目的一部分。
// src/output/geopackage.rs - GeoPackage 图层输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::{
  geo::Point,
  output::{DatasetError, FeatureLayer, PolygonRecord},
  reconstruct::Polygon,
};

/// 'GPKG'
const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;
const GPKG_USER_VERSION: i32 = 10200;
/// 未定义的笛卡尔坐标系
const UNDEFINED_SRS_ID: i32 = -1;
const GEOMETRY_COLUMN: &str = "geometry";

const WKB_POLYGON: u32 = 3;
/// 小端字节序，包含 `[minx, maxx, miny, maxy]` 包络
const GPKG_FLAGS: u8 = 0b0000_0011;

const CORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition TEXT NOT NULL,
  description TEXT
);
INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES
  ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
  ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system'),
  ('WGS 84 geodetic', 4326, 'EPSG', 4326, 'GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]', 'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid');
CREATE TABLE IF NOT EXISTS gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
"#;

/// 以运行开始时间命名的输出文件名：`YYYYMMDD_HHMMSS.gpkg`
pub fn run_file_name<Tz: TimeZone>(started: &DateTime<Tz>) -> String
where
  Tz::Offset: std::fmt::Display,
{
  format!("{}.gpkg", started.format("%Y%m%d_%H%M%S"))
}

fn quote_identifier(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// 编码为 GeoPackage 二进制几何：`GP` 头 + 包络 + 小端 WKB 多边形
pub fn encode_geometry(polygon: &Polygon, srs_id: i32) -> Vec<u8> {
  let (min_x, max_x, min_y, max_y) = polygon.envelope();
  let mut blob = Vec::with_capacity(8 + 32 + 13 + polygon.ring.len() * 16);
  blob.extend_from_slice(b"GP");
  blob.push(0);
  blob.push(GPKG_FLAGS);
  blob.extend_from_slice(&srs_id.to_le_bytes());
  for value in [min_x, max_x, min_y, max_y] {
    blob.extend_from_slice(&value.to_le_bytes());
  }

  blob.push(1);
  blob.extend_from_slice(&WKB_POLYGON.to_le_bytes());
  blob.extend_from_slice(&1u32.to_le_bytes());
  blob.extend_from_slice(&(polygon.ring.len() as u32).to_le_bytes());
  for point in &polygon.ring {
    blob.extend_from_slice(&point.x.to_le_bytes());
    blob.extend_from_slice(&point.y.to_le_bytes());
  }
  blob
}

struct Cursor<'a> {
  data: &'a [u8],
  offset: usize,
}

impl<'a> Cursor<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8], DatasetError> {
    let data: &'a [u8] = self.data;
    let end = self.offset + n;
    let slice = data
      .get(self.offset..end)
      .ok_or_else(|| DatasetError::Geometry(format!("几何数据在偏移 {} 处截断", self.offset)))?;
    self.offset = end;
    Ok(slice)
  }

  fn u32_le(&mut self) -> Result<u32, DatasetError> {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(self.take(4)?);
    Ok(u32::from_le_bytes(bytes))
  }

  fn f64_le(&mut self) -> Result<f64, DatasetError> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(self.take(8)?);
    Ok(f64::from_le_bytes(bytes))
  }
}

/// 解码本模块写出的四边形几何
pub fn decode_geometry(blob: &[u8]) -> Result<Polygon, DatasetError> {
  let mut cursor = Cursor {
    data: blob,
    offset: 0,
  };
  if cursor.take(2)? != b"GP" {
    return Err(DatasetError::Geometry("缺少 GP 头".to_string()));
  }
  let header = cursor.take(2)?;
  let envelope_len = match (header[1] >> 1) & 0b111 {
    0 => 0,
    1 => 32,
    2 | 3 => 48,
    4 => 64,
    other => {
      return Err(DatasetError::Geometry(format!("包络类型无效: {}", other)));
    }
  };
  cursor.take(4 + envelope_len)?;

  if cursor.take(1)?[0] != 1 {
    return Err(DatasetError::Geometry("仅支持小端 WKB".to_string()));
  }
  let kind = cursor.u32_le()?;
  let rings = cursor.u32_le()?;
  let points = cursor.u32_le()?;
  if kind != WKB_POLYGON || rings != 1 || points != 5 {
    return Err(DatasetError::Geometry(format!(
      "期望单环五点多边形，实际类型 {} 环数 {} 点数 {}",
      kind, rings, points
    )));
  }

  let mut ring = [Point::new(0.0, 0.0); 5];
  for point in ring.iter_mut() {
    *point = Point::new(cursor.f64_le()?, cursor.f64_le()?);
  }
  Ok(Polygon { ring })
}

/// GeoPackage 文件中的单个要素图层。
///
/// 打开已存在的文件时继续追加，不会截断已有记录。
pub struct GeoPackageLayer {
  conn: Connection,
  path: PathBuf,
  table: String,
  srs_id: i32,
  rows: usize,
  last_fid: i64,
}

impl GeoPackageLayer {
  pub fn open(path: &Path, table: &str) -> Result<Self, DatasetError> {
    let sqlite = |source| DatasetError::Sqlite {
      path: path.to_path_buf(),
      source,
    };

    let existed = path.exists();
    let conn = Connection::open(path).map_err(sqlite)?;
    let quoted = quote_identifier(table);

    if !existed {
      info!("创建 GeoPackage: {}", path.display());
      conn
        .pragma_update(None, "application_id", GPKG_APPLICATION_ID)
        .map_err(sqlite)?;
      conn
        .pragma_update(None, "user_version", GPKG_USER_VERSION)
        .map_err(sqlite)?;
    } else {
      info!("继续写入已有 GeoPackage: {}", path.display());
    }

    conn.execute_batch(CORE_SCHEMA).map_err(sqlite)?;
    conn
      .execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (fid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, {} POLYGON, score REAL);",
        quoted, GEOMETRY_COLUMN
      ))
      .map_err(sqlite)?;
    conn
      .execute(
        "INSERT OR IGNORE INTO gpkg_contents (table_name, data_type, identifier, srs_id) VALUES (?1, 'features', ?1, ?2)",
        params![table, UNDEFINED_SRS_ID],
      )
      .map_err(sqlite)?;
    conn
      .execute(
        "INSERT OR IGNORE INTO gpkg_geometry_columns VALUES (?1, ?2, 'POLYGON', ?3, 0, 0)",
        params![table, GEOMETRY_COLUMN, UNDEFINED_SRS_ID],
      )
      .map_err(sqlite)?;

    let (rows, last_fid): (i64, i64) = conn
      .query_row(
        &format!("SELECT COUNT(*), COALESCE(MAX(fid), 0) FROM {}", quoted),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(sqlite)?;
    debug!("图层 {} 已有 {} 条记录，最大 fid {}", table, rows, last_fid);

    Ok(Self {
      conn,
      path: path.to_path_buf(),
      table: table.to_string(),
      srs_id: UNDEFINED_SRS_ID,
      rows: rows as usize,
      last_fid,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 按 fid 顺序读取图层中的全部记录
  pub fn read_records(&self) -> Result<Vec<PolygonRecord>, DatasetError> {
    let sqlite = |source| DatasetError::Sqlite {
      path: self.path.clone(),
      source,
    };
    let mut stmt = self
      .conn
      .prepare(&format!(
        "SELECT fid, {}, score FROM {} ORDER BY fid",
        GEOMETRY_COLUMN,
        quote_identifier(&self.table)
      ))
      .map_err(sqlite)?;
    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, f64>(2)?,
        ))
      })
      .map_err(sqlite)?;

    let mut records = Vec::new();
    for row in rows {
      let (fid, blob, score) = row.map_err(sqlite)?;
      records.push(PolygonRecord {
        fid,
        polygon: decode_geometry(&blob)?,
        score: score as f32,
      });
    }
    Ok(records)
  }
}

impl FeatureLayer for GeoPackageLayer {
  fn row_count(&self) -> usize {
    self.rows
  }

  fn last_fid(&self) -> i64 {
    self.last_fid
  }

  fn append(&mut self, records: &[PolygonRecord]) -> Result<(), DatasetError> {
    let path = self.path.clone();
    let sqlite = |source| DatasetError::Sqlite {
      path: path.clone(),
      source,
    };

    let (min_x, max_x, min_y, max_y) = records.iter().map(|r| r.polygon.envelope()).fold(
      (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
      |acc, env| (acc.0.min(env.0), acc.1.max(env.1), acc.2.min(env.2), acc.3.max(env.3)),
    );

    let quoted = quote_identifier(&self.table);
    let tx = self.conn.transaction().map_err(sqlite)?;
    {
      let mut stmt = tx
        .prepare(&format!(
          "INSERT INTO {} (fid, {}, score) VALUES (?1, ?2, ?3)",
          quoted, GEOMETRY_COLUMN
        ))
        .map_err(sqlite)?;
      for record in records {
        stmt
          .execute(params![
            record.fid,
            encode_geometry(&record.polygon, self.srs_id),
            record.score as f64
          ])
          .map_err(sqlite)?;
      }
    }
    tx.execute(
      "UPDATE gpkg_contents SET \
         last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now'), \
         min_x = MIN(COALESCE(min_x, ?1), ?1), \
         max_x = MAX(COALESCE(max_x, ?2), ?2), \
         min_y = MIN(COALESCE(min_y, ?3), ?3), \
         max_y = MAX(COALESCE(max_y, ?4), ?4) \
       WHERE table_name = ?5",
      params![min_x, max_x, min_y, max_y, self.table],
    )
    .map_err(sqlite)?;
    tx.commit().map_err(sqlite)?;

    self.rows += records.len();
    self.last_fid = records
      .iter()
      .map(|r| r.fid)
      .fold(self.last_fid, i64::max);
    debug!("图层 {} 共 {} 条记录", self.table, self.rows);
    Ok(())
  }
}
