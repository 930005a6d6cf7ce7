//! Order-book snapshot data
//!
//! Price-level view of a book replica:
//! - bids strictly descending by price, asks strictly ascending
//! - at most one level per price
//! - no level with amount ≤ 0
//!
//! Every constructor normalises and every mutation preserves the ordering,
//! so the invariant holds for every reachable state. All arithmetic uses
//! `Decimal`.
//!
//! Delta semantics on top of the generic path rules:
//! - `update` on `bids`/`asks` with `[[price, amount], ...]` upserts by
//!   price; an amount of zero removes the level
//! - `delete` on `bids`/`asks` with `[price, ...]` removes those levels;
//!   `null` data clears the side
//! - `insert`/`snapshot` on `bids`/`asks` replace the side
//! - anything else goes through the generic value rules and is
//!   re-normalised

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use feed_types::errors::ApplyError;

use crate::apply::{apply_value_delta, check_value_delta, DeltaTarget};
use crate::delta::{Delta, DeltaKind};
use crate::path::Path;
use crate::value::Value;

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }

    fn is_empty(&self) -> bool {
        self.amount <= Decimal::ZERO
    }

    fn to_value(self) -> Value {
        Value::Sequence(vec![Value::Number(self.price), Value::Number(self.amount)])
    }
}

/// Which side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "bids" => Some(BookSide::Bid),
            "asks" => Some(BookSide::Ask),
            _ => None,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            BookSide::Bid => "bids",
            BookSide::Ask => "asks",
        }
    }

    /// Ordering of `a` relative to `b` in this side's book order.
    fn book_order(&self, a: Decimal, b: Decimal) -> Ordering {
        match self {
            BookSide::Bid => b.cmp(&a),
            BookSide::Ask => a.cmp(&b),
        }
    }
}

/// Order-book payload of a snapshot.
///
/// Serialises as `{"bids": [["price", "amount"], ...], "asks": [...]}` with
/// decimal strings; reads numbers, strings or `{price, amount}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "Value")]
pub struct OrderBookData {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl OrderBookData {
    /// An empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from raw levels in any order. Later duplicates win and
    /// non-positive amounts are dropped.
    pub fn from_levels(
        bids: impl IntoIterator<Item = PriceLevel>,
        asks: impl IntoIterator<Item = PriceLevel>,
    ) -> Self {
        Self {
            bids: normalize(BookSide::Bid, bids),
            asks: normalize(BookSide::Ask, asks),
        }
    }

    /// Bid levels, best (highest) first.
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Ask levels, best (lowest) first.
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn side(&self, side: BookSide) -> &[PriceLevel] {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: BookSide) -> &mut Vec<PriceLevel> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    /// Set the amount at `price`. Zero or negative removes the level.
    pub fn upsert(&mut self, side: BookSide, level: PriceLevel) {
        let levels = self.side_mut(side);
        match levels.binary_search_by(|probe| side.book_order(probe.price, level.price)) {
            Ok(i) if level.is_empty() => {
                levels.remove(i);
            }
            Ok(i) => levels[i].amount = level.amount,
            Err(_) if level.is_empty() => {}
            Err(i) => levels.insert(i, level),
        }
    }

    /// Remove the level at `price`. Returns whether one existed.
    pub fn remove_price(&mut self, side: BookSide, price: Decimal) -> bool {
        let levels = self.side_mut(side);
        match levels.binary_search_by(|probe| side.book_order(probe.price, price)) {
            Ok(i) => {
                levels.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn clear_side(&mut self, side: BookSide) {
        self.side_mut(side).clear();
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Best bid and best ask.
    pub fn best_bid_ask(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (self.best_bid(), self.best_ask())
    }

    /// `(best_bid + best_ask) / 2`, or `None` if either side is empty or
    /// the sum overflows.
    pub fn mid_price(&self) -> Option<Decimal> {
        match self.best_bid_ask() {
            (Some(bid), Some(ask)) => bid
                .price
                .checked_add(ask.price)
                .and_then(|sum| sum.checked_div(Decimal::TWO)),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match self.best_bid_ask() {
            (Some(bid), Some(ask)) => ask.price.checked_sub(bid.price),
            _ => None,
        }
    }

    /// Top `max_levels` of each side.
    pub fn depth(&self, max_levels: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (
            self.bids.iter().take(max_levels).copied().collect(),
            self.asks.iter().take(max_levels).copied().collect(),
        )
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Check the ordering and positivity invariant.
    pub fn is_consistent(&self) -> bool {
        side_is_consistent(BookSide::Bid, &self.bids)
            && side_is_consistent(BookSide::Ask, &self.asks)
    }

    pub fn to_value(&self) -> Value {
        let side = |levels: &[PriceLevel]| {
            Value::Sequence(levels.iter().map(|l| l.to_value()).collect())
        };
        let mut map = BTreeMap::new();
        map.insert("bids".to_string(), side(&self.bids));
        map.insert("asks".to_string(), side(&self.asks));
        Value::Record(map)
    }

    /// Read a `{bids, asks}` record. Missing sides are empty; other keys are
    /// ignored.
    pub fn from_value(value: &Value) -> Result<Self, ApplyError> {
        let record = value.as_record().ok_or_else(|| ApplyError::TypeMismatch {
            path: String::new(),
            expected: "record".to_string(),
            found: value.kind_name().to_string(),
        })?;

        let mut sides = [Vec::new(), Vec::new()];
        for (slot, side) in sides.iter_mut().zip([BookSide::Bid, BookSide::Ask]) {
            if let Some(levels) = record.get(side.field()) {
                *slot = parse_levels(levels, side.field())?;
            }
        }
        let [bids, asks] = sides;
        Ok(Self::from_levels(bids, asks))
    }

    fn check_side_delta(&self, side: BookSide, delta: &Delta) -> Result<Vec<String>, ApplyError> {
        let field = side.field();
        let data = delta.data.as_ref().ok_or_else(|| ApplyError::MissingData {
            path: field.to_string(),
        })?;
        match delta.kind {
            DeltaKind::Update | DeltaKind::Insert | DeltaKind::Snapshot => {
                parse_levels(data, field)?;
                Ok(Vec::new())
            }
            DeltaKind::Delete => {
                let prices = parse_prices(data, field)?;
                let missing = prices
                    .iter()
                    .filter(|p| !self.side(side).iter().any(|l| l.price == **p))
                    .count();
                if missing > 0 {
                    Ok(vec![format!("Delete targets {} non-existent {} level(s)", missing, field)])
                } else {
                    Ok(Vec::new())
                }
            }
            DeltaKind::Unknown => Err(ApplyError::UnknownKind {
                kind: delta.kind.label().to_string(),
            }),
        }
    }

    fn apply_side_delta(&mut self, side: BookSide, delta: &Delta) -> Result<(), ApplyError> {
        let field = side.field();
        let data = delta.data.as_ref().ok_or_else(|| ApplyError::MissingData {
            path: field.to_string(),
        })?;
        match delta.kind {
            DeltaKind::Update => {
                for level in parse_levels(data, field)? {
                    self.upsert(side, level);
                }
            }
            DeltaKind::Insert | DeltaKind::Snapshot => {
                let levels = parse_levels(data, field)?;
                *self.side_mut(side) = normalize(side, levels);
            }
            DeltaKind::Delete => {
                if *data == Value::Null {
                    self.clear_side(side);
                } else {
                    for price in parse_prices(data, field)? {
                        self.remove_price(side, price);
                    }
                }
            }
            DeltaKind::Unknown => {
                return Err(ApplyError::UnknownKind {
                    kind: delta.kind.label().to_string(),
                })
            }
        }
        Ok(())
    }
}

impl DeltaTarget for OrderBookData {
    fn check_delta(&self, delta: &Delta, path: &Path) -> Result<Vec<String>, ApplyError> {
        match path.as_single_field().and_then(BookSide::from_field) {
            Some(side) => self.check_side_delta(side, delta),
            None => check_value_delta(&self.to_value(), delta, path),
        }
    }

    fn apply_delta(&mut self, delta: &Delta, path: &Path) -> Result<(), ApplyError> {
        if let Some(side) = path.as_single_field().and_then(BookSide::from_field) {
            return self.apply_side_delta(side, delta);
        }
        let mut value = self.to_value();
        apply_value_delta(&mut value, delta, path)?;
        *self = Self::from_value(&value)?;
        Ok(())
    }

    fn default_checksum(&self) -> String {
        crate::checksum::sha256_order_book(self)
    }
}

impl TryFrom<Value> for OrderBookData {
    type Error = ApplyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl From<OrderBookData> for Value {
    fn from(book: OrderBookData) -> Self {
        book.to_value()
    }
}

impl Serialize for OrderBookData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs = |levels: &[PriceLevel]| -> Vec<(Decimal, Decimal)> {
            levels.iter().map(|l| (l.price, l.amount)).collect()
        };
        let mut state = serializer.serialize_struct("OrderBookData", 2)?;
        state.serialize_field("bids", &pairs(&self.bids))?;
        state.serialize_field("asks", &pairs(&self.asks))?;
        state.end()
    }
}

/// Upsert `updates` into `existing` levels of one side. The result is in
/// book order with zero-amount levels removed; inputs are untouched.
pub fn merge_order_book_levels(
    existing: &[PriceLevel],
    updates: &[PriceLevel],
    side: BookSide,
) -> Vec<PriceLevel> {
    let mut merged = normalize(side, existing.iter().copied());
    for update in updates {
        match merged.binary_search_by(|probe| side.book_order(probe.price, update.price)) {
            Ok(i) if update.is_empty() => {
                merged.remove(i);
            }
            Ok(i) => merged[i].amount = update.amount,
            Err(_) if update.is_empty() => {}
            Err(i) => merged.insert(i, *update),
        }
    }
    merged
}

/// Sort raw levels into a book: bids descending, asks ascending.
pub fn sort_order_book(bids: &[PriceLevel], asks: &[PriceLevel]) -> OrderBookData {
    OrderBookData::from_levels(bids.iter().copied(), asks.iter().copied())
}

fn normalize(side: BookSide, levels: impl IntoIterator<Item = PriceLevel>) -> Vec<PriceLevel> {
    let by_price: BTreeMap<Decimal, Decimal> =
        levels.into_iter().map(|l| (l.price, l.amount)).collect();
    let mut out: Vec<PriceLevel> = by_price
        .into_iter()
        .map(|(price, amount)| PriceLevel::new(price, amount))
        .filter(|l| !l.is_empty())
        .collect();
    if side == BookSide::Bid {
        out.reverse();
    }
    out
}

fn side_is_consistent(side: BookSide, levels: &[PriceLevel]) -> bool {
    levels.iter().all(|l| !l.is_empty())
        && levels
            .windows(2)
            .all(|pair| side.book_order(pair[0].price, pair[1].price) == Ordering::Less)
}

fn level_mismatch(path: &str, found: &Value) -> ApplyError {
    ApplyError::TypeMismatch {
        path: path.to_string(),
        expected: "price level".to_string(),
        found: found.kind_name().to_string(),
    }
}

/// A level is `[price, amount, ...]` or `{price, amount}`; numbers may be
/// text.
fn parse_level(value: &Value, path: &str) -> Result<PriceLevel, ApplyError> {
    let (price, amount) = match value {
        Value::Sequence(items) if items.len() >= 2 => (&items[0], &items[1]),
        Value::Record(map) => match (map.get("price"), map.get("amount")) {
            (Some(price), Some(amount)) => (price, amount),
            _ => return Err(level_mismatch(path, value)),
        },
        other => return Err(level_mismatch(path, other)),
    };
    match (price.as_decimal(), amount.as_decimal()) {
        (Some(price), Some(amount)) => Ok(PriceLevel::new(price, amount)),
        _ => Err(level_mismatch(path, value)),
    }
}

fn parse_levels(value: &Value, path: &str) -> Result<Vec<PriceLevel>, ApplyError> {
    let items = value.as_sequence().ok_or_else(|| ApplyError::TypeMismatch {
        path: path.to_string(),
        expected: "sequence".to_string(),
        found: value.kind_name().to_string(),
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_level(item, &format!("{}[{}]", path, i)))
        .collect()
}

/// Prices to delete: bare numbers or levels (only the price is used).
fn parse_prices(value: &Value, path: &str) -> Result<Vec<Decimal>, ApplyError> {
    if *value == Value::Null {
        return Ok(Vec::new());
    }
    let items = value.as_sequence().ok_or_else(|| ApplyError::TypeMismatch {
        path: path.to_string(),
        expected: "sequence".to_string(),
        found: value.kind_name().to_string(),
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let at = format!("{}[{}]", path, i);
            match item {
                Value::Sequence(_) | Value::Record(_) => parse_level(item, &at).map(|l| l.price),
                scalar => scalar.as_decimal().ok_or_else(|| ApplyError::TypeMismatch {
                    path: at,
                    expected: "number".to_string(),
                    found: scalar.kind_name().to_string(),
                }),
            }
        })
        .collect()
}
