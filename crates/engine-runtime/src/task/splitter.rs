use engine_config::task::{DumperConfiguration, InventoryDumperConfiguration};
use engine_processing::{dumper::InventoryDumperCreator, error::DumperError};
use model::position::Position;
use tracing::debug;

/// Cuts every table of a dumper into inventory splits of at most
/// `sharding_size` unique key values.
#[derive(Debug, Clone, Copy)]
pub struct InventoryTaskSplitter {
    sharding_size: u64,
}

impl InventoryTaskSplitter {
    pub fn new(sharding_size: u64) -> Self {
        Self {
            sharding_size: sharding_size.max(1),
        }
    }

    /// Inclusive `IntegerPrimaryKey` ranges covering `min..=max`.
    pub fn split_range(&self, min: i64, max: i64) -> Vec<Position> {
        let step = i64::try_from(self.sharding_size - 1).unwrap_or(i64::MAX);
        let mut ranges = Vec::new();
        let mut begin = min;
        while begin <= max {
            let end = begin.saturating_add(step).min(max);
            ranges.push(Position::IntegerPrimaryKey { begin, end });
            match end.checked_add(1) {
                Some(next) => begin = next,
                None => break,
            }
        }
        ranges
    }

    /// Splits of every table in `dumper`, split on `unique_key_column`. An
    /// empty table yields a single split over the whole table.
    pub async fn split(
        &self,
        dumper: &DumperConfiguration,
        unique_key_column: &str,
        creator: &dyn InventoryDumperCreator,
    ) -> Result<Vec<InventoryDumperConfiguration>, DumperError> {
        let mut splits = Vec::new();

        for (actual_table, logic_table) in &dumper.table_name_map {
            let key_range = creator
                .unique_key_range(&dumper.data_source_name, actual_table, unique_key_column)
                .await?;
            let ranges = match key_range {
                Some((min, max)) => self.split_range(min, max),
                None => vec![Position::Placeholder],
            };
            debug!(
                data_source = %dumper.data_source_name,
                table = %actual_table,
                splits = ranges.len(),
                "Split inventory table"
            );

            splits.extend(ranges.into_iter().enumerate().map(|(shard_index, range)| {
                InventoryDumperConfiguration {
                    dumper: dumper.clone(),
                    actual_table_name: actual_table.clone(),
                    logic_table_name: logic_table.clone(),
                    unique_key_column: Some(unique_key_column.to_string()),
                    shard_index,
                    range,
                }
            }));
        }

        Ok(splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_processing::fixture::ScriptedInventoryDumperCreator;
    use std::collections::BTreeMap;

    fn range(begin: i64, end: i64) -> Position {
        Position::IntegerPrimaryKey { begin, end }
    }

    #[test]
    fn ranges_cover_keys_without_overlap() {
        let splitter = InventoryTaskSplitter::new(10);
        assert_eq!(
            splitter.split_range(1, 25),
            vec![range(1, 10), range(11, 20), range(21, 25)]
        );
        assert_eq!(splitter.split_range(7, 7), vec![range(7, 7)]);
        assert!(splitter.split_range(5, 1).is_empty());
    }

    #[test]
    fn ranges_stop_at_key_limits() {
        let splitter = InventoryTaskSplitter::new(u64::MAX);
        assert_eq!(
            splitter.split_range(i64::MIN, i64::MAX),
            vec![range(i64::MIN, -1), range(0, i64::MAX)]
        );
        assert_eq!(
            InventoryTaskSplitter::new(2).split_range(i64::MAX - 2, i64::MAX),
            vec![range(i64::MAX - 2, i64::MAX - 1), range(i64::MAX, i64::MAX)]
        );
    }

    #[tokio::test]
    async fn splits_every_table() {
        let dumper = DumperConfiguration {
            data_source_name: "ds_0".into(),
            table_name_map: BTreeMap::from([
                ("t_item_0".to_string(), "t_item".to_string()),
                ("t_order_0".to_string(), "t_order".to_string()),
            ]),
            position: Position::Placeholder,
            batch_size: 100,
        };
        let creator = ScriptedInventoryDumperCreator::default().with_table("t_order_0", 1..=25);

        let splits = InventoryTaskSplitter::new(10)
            .split(&dumper, "id", &creator)
            .await
            .unwrap();

        let ids: Vec<String> = splits.iter().map(|s| s.task_id()).collect();
        assert_eq!(
            ids,
            vec![
                "ds_0.t_item_0#0",
                "ds_0.t_order_0#0",
                "ds_0.t_order_0#1",
                "ds_0.t_order_0#2"
            ]
        );
        assert_eq!(splits[0].range, Position::Placeholder);
        assert_eq!(splits[3].range, range(21, 25));
        assert_eq!(splits[3].logic_table_name, "t_order");
    }
}
