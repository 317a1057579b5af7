//! Customer segmentation over the user-level aggregate table.

use serde::Serialize;
use tracing::debug;

use kpi_core::Table;

use crate::error::Result;
use crate::stats;

pub const FREQUENCY_SEGMENTS: [&str; 4] = ["One-time", "Occasional", "Regular", "Power User"];
pub const BASKET_SEGMENTS: [&str; 4] = ["Small Basket", "Medium Basket", "Large Basket", "XL Basket"];

/// Aggregates for one named segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: &'static str,
    pub customer_count: usize,
    pub orders: f64,
    pub items: f64,
    /// Mean over the segment's customers; `None` for an empty segment.
    pub orders_per_customer: Option<f64>,
    pub avg_basket_size: Option<f64>,
    /// Product of the two segment means.
    pub vpac: Option<f64>,
    pub customer_share: f64,
    pub order_share: f64,
    pub item_share: f64,
}

/// One customer's row, reduced to the fields segmentation reads.
#[derive(Debug, Clone, Copy)]
struct UserRow {
    orders: Option<f64>,
    items: Option<f64>,
    orders_per_customer: Option<f64>,
    avg_basket_size: Option<f64>,
}

fn user_rows(table: &Table) -> Result<Vec<UserRow>> {
    let orders = table.f64_column("orders")?;
    let items = table.f64_column("items")?;
    let opc = table.f64_column("orders_per_customer")?;
    let basket = table.f64_column("avg_basket_size")?;
    Ok((0..table.row_count())
        .map(|i| UserRow {
            orders: orders[i],
            items: items[i],
            orders_per_customer: opc[i],
            avg_basket_size: basket[i],
        })
        .collect())
}

fn frequency_bucket(orders: f64) -> usize {
    if orders == 1.0 {
        0
    } else if orders <= 4.0 {
        1
    } else if orders <= 10.0 {
        2
    } else {
        3
    }
}

/// Segment customers by number of orders.
///
/// `1` One-time, `2–4` Occasional, `5–10` Regular, `≥ 11` Power User. Rules
/// apply in that order, so a zero order count lands in Occasional. The four
/// segments are always returned in that order. Rows without an order count
/// are left out.
pub fn segment_by_order_frequency(table: &Table) -> Result<Vec<SegmentSummary>> {
    let rows = user_rows(table)?;
    let mut buckets: [Vec<UserRow>; 4] = Default::default();
    let mut skipped = 0usize;
    for row in rows {
        match row.orders {
            Some(orders) => buckets[frequency_bucket(orders)].push(row),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "rows without orders left out of frequency segments");
    }
    Ok(summarize(FREQUENCY_SEGMENTS, buckets))
}

/// Segment customers by quartile of average basket size.
///
/// Cut points are the 25th, 50th and 75th percentiles of the input. Rows
/// with a null basket size are left out.
pub fn segment_by_basket_size(table: &Table) -> Result<Vec<SegmentSummary>> {
    let rows: Vec<UserRow> = user_rows(table)?
        .into_iter()
        .filter(|r| r.avg_basket_size.is_some())
        .collect();
    let sizes: Vec<f64> = rows.iter().filter_map(|r| r.avg_basket_size).collect();

    let mut buckets: [Vec<UserRow>; 4] = Default::default();
    if let (Some(q25), Some(q50), Some(q75)) = (
        stats::quantile(&sizes, 0.25),
        stats::quantile(&sizes, 0.5),
        stats::quantile(&sizes, 0.75),
    ) {
        debug!(q25, q50, q75, "basket size cut points");
        for row in rows {
            let size = row.avg_basket_size.unwrap_or_default();
            let idx = if size <= q25 {
                0
            } else if size <= q50 {
                1
            } else if size <= q75 {
                2
            } else {
                3
            };
            buckets[idx].push(row);
        }
    }
    Ok(summarize(BASKET_SEGMENTS, buckets))
}

fn summarize(names: [&'static str; 4], buckets: [Vec<UserRow>; 4]) -> Vec<SegmentSummary> {
    let mut out: Vec<SegmentSummary> = names
        .into_iter()
        .zip(buckets)
        .map(|(segment, rows)| {
            let opc: Vec<f64> = rows.iter().filter_map(|r| r.orders_per_customer).collect();
            let basket: Vec<f64> = rows.iter().filter_map(|r| r.avg_basket_size).collect();
            let orders_per_customer = stats::mean(&opc);
            let avg_basket_size = stats::mean(&basket);
            SegmentSummary {
                segment,
                customer_count: rows.len(),
                orders: rows.iter().filter_map(|r| r.orders).sum(),
                items: rows.iter().filter_map(|r| r.items).sum(),
                orders_per_customer,
                avg_basket_size,
                vpac: orders_per_customer.zip(avg_basket_size).map(|(o, b)| o * b),
                customer_share: 0.0,
                order_share: 0.0,
                item_share: 0.0,
            }
        })
        .collect();

    let customers: usize = out.iter().map(|s| s.customer_count).sum();
    let orders: f64 = out.iter().map(|s| s.orders).sum();
    let items: f64 = out.iter().map(|s| s.items).sum();
    for s in &mut out {
        s.customer_share = share(s.customer_count as f64, customers as f64);
        s.order_share = share(s.orders, orders);
        s.item_share = share(s.items, items);
    }
    out
}

fn share(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total
    }
}

/// Segment summaries as a [`Table`].
pub fn segments_to_table(segments: &[SegmentSummary]) -> Table {
    Table {
        columns: [
            "segment",
            "customer_count",
            "orders",
            "items",
            "orders_per_customer",
            "avg_basket_size",
            "vpac",
            "customer_share",
            "order_share",
            "item_share",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect(),
        rows: segments
            .iter()
            .map(|s| {
                vec![
                    s.segment.into(),
                    (s.customer_count as u64).into(),
                    s.orders.into(),
                    s.items.into(),
                    s.orders_per_customer.into(),
                    s.avg_basket_size.into(),
                    s.vpac.into(),
                    s.customer_share.into(),
                    s.order_share.into(),
                    s.item_share.into(),
                ]
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpi_core::Value;

    fn users(orders: &[i64], baskets: &[f64]) -> Table {
        let rows: Vec<Vec<Value>> = orders
            .iter()
            .zip(baskets)
            .enumerate()
            .map(|(i, (&o, &b))| {
                vec![
                    (i as i64).into(),
                    o.into(),
                    Value::Float(o as f64 * b),
                    o.into(),
                    b.into(),
                ]
            })
            .collect();
        Table::with_rows(
            ["user_id", "orders", "items", "orders_per_customer", "avg_basket_size"],
            rows,
        )
        .unwrap()
    }

    #[test]
    fn frequency_boundaries() {
        let t = users(&[1, 2, 4, 5, 10, 11], &[1.0; 6]);
        let segs = segment_by_order_frequency(&t).unwrap();
        let counts: Vec<_> = segs.iter().map(|s| s.customer_count).collect();
        assert_eq!(counts, vec![1, 2, 2, 1]);
        assert_eq!(segs[3].segment, "Power User");
    }

    #[test]
    fn zero_orders_is_occasional() {
        let t = users(&[0], &[1.0]);
        let segs = segment_by_order_frequency(&t).unwrap();
        assert_eq!(segs[0].customer_count, 0);
        assert_eq!(segs[1].segment, "Occasional");
        assert_eq!(segs[1].customer_count, 1);
    }

    #[test]
    fn empty_segments_keep_rows() {
        let t = users(&[2, 3], &[4.0, 6.0]);
        let segs = segment_by_order_frequency(&t).unwrap();
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[0].customer_count, 0);
        assert_eq!(segs[0].orders, 0.0);
        assert_eq!(segs[0].orders_per_customer, None);
        assert_eq!(segs[0].vpac, None);
        assert_eq!(segs[1].customer_share, 1.0);
    }

    #[test]
    fn segment_vpac_is_product_of_means() {
        // Occasional: opc {2, 4}, basket {10, 2}. Product of means = 3 × 6 = 18,
        // mean of per-user products = (20 + 8) / 2 = 14.
        let t = users(&[2, 4], &[10.0, 2.0]);
        let segs = segment_by_order_frequency(&t).unwrap();
        assert_eq!(segs[1].vpac, Some(18.0));
    }

    #[test]
    fn basket_quartiles() {
        let t = users(&[1, 1, 1, 1, 1], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let segs = segment_by_basket_size(&t).unwrap();
        let counts: Vec<_> = segs.iter().map(|s| s.customer_count).collect();
        assert_eq!(counts, vec![2, 1, 1, 1]);
        assert_eq!(segs[3].segment, "XL Basket");
    }

    #[test]
    fn basket_skips_null_sizes() {
        let mut t = users(&[1, 1, 1], &[1.0, 2.0, 3.0]);
        t.rows[1][4] = Value::Null;
        let segs = segment_by_basket_size(&t).unwrap();
        let total: usize = segs.iter().map(|s| s.customer_count).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn empty_table_gives_zero_shares() {
        let t = users(&[], &[]);
        let segs = segment_by_basket_size(&t).unwrap();
        assert_eq!(segs.len(), 4);
        assert!(segs.iter().all(|s| s.customer_share == 0.0));
    }

    #[test]
    fn table_view() {
        let t = users(&[1, 5], &[2.0, 3.0]);
        let table = segments_to_table(&segment_by_order_frequency(&t).unwrap());
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.get(2, "segment"), Some(&Value::Text("Regular".into())));
        assert_eq!(table.get(1, "vpac"), Some(&Value::Null));
    }
}
