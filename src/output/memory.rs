// 该文件是 Loufang （楼房） 项目的一部分。
// src/output/memory.rs - 内存图层
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

use crate::output::{DatasetError, FeatureLayer, PolygonRecord};

/// 保存在内存中的图层，用于不需要落盘的场景
#[derive(Debug, Default, Clone)]
pub struct MemoryLayer {
  existing: usize,
  records: Vec<PolygonRecord>,
  appends: usize,
}

impl MemoryLayer {
  /// 模拟一个已有 `rows` 条记录的图层
  pub fn with_rows(rows: usize) -> Self {
    Self {
      existing: rows,
      ..Self::default()
    }
  }

  /// 本次新增的记录
  pub fn records(&self) -> &[PolygonRecord] {
    &self.records
  }

  pub fn appends(&self) -> usize {
    self.appends
  }
}

impl FeatureLayer for MemoryLayer {
  fn row_count(&self) -> usize {
    self.existing + self.records.len()
  }

  fn last_fid(&self) -> i64 {
    self.records
      .iter()
      .map(|r| r.fid)
      .fold(self.existing as i64, i64::max)
  }

  fn append(&mut self, records: &[PolygonRecord]) -> Result<(), DatasetError> {
    self.records.extend_from_slice(records);
    self.appends += 1;
    Ok(())
  }
}
