use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SalesError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// Rows written by the store initializer on first run:
/// (date, product, category, quantity, price per unit, region).
const SEED_ROWS: [(&str, &str, &str, i64, f64, &str); 10] = [
    ("2025-01-01", "Конструктор \"Робот\"", "Конструкторы", 10, 1500.0, "Москва"),
    ("2025-01-01", "Мягкий медведь", "Мягкие игрушки", 25, 800.0, "Санкт-Петербург"),
    ("2025-01-02", "Набор карандашей", "Канцелярия", 15, 300.0, "Москва"),
    ("2025-01-03", "Конструктор \"Робот\"", "Конструкторы", 12, 1500.0, "Казань"),
    ("2025-01-04", "Пазл \"Галактика\"", "Пазлы", 8, 1200.0, "Новосибирск"),
    ("2025-01-05", "Мягкий заяц", "Мягкие игрушки", 20, 750.0, "Екатеринбург"),
    ("2025-01-05", "Конструктор \"Космос\"", "Конструкторы", 7, 1800.0, "Москва"),
    ("2025-01-06", "Пазл \"Динозавры\"", "Пазлы", 14, 1300.0, "Санкт-Петербург"),
    ("2025-01-07", "Мягкий кот", "Мягкие игрушки", 18, 900.0, "Казань"),
    ("2025-01-07", "Набор фломастеров", "Канцелярия", 10, 350.0, "Москва"),
];

/// A sale as written to the store. Dates stay in their textual form until
/// they are read back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSale {
    pub date: String,
    pub product_name: String,
    pub category: String,
    pub quantity: i64,
    pub price_per_unit: f64,
    pub region: String,
}

impl NewSale {
    /// Validates a sale before it is written.
    ///
    /// # Errors
    /// Returns [`SalesError::Validation`] when a text field is blank, the
    /// quantity or price is negative, or the date is not `YYYY-MM-DD`.
    pub fn validate(&self) -> Result<(), SalesError> {
        for (field, value) in [
            ("product_name", &self.product_name),
            ("category", &self.category),
            ("region", &self.region),
        ] {
            if value.trim().is_empty() {
                return Err(SalesError::Validation(format!("{field} cannot be empty")));
            }
        }

        if self.quantity < 0 {
            return Err(SalesError::Validation(format!(
                "quantity MUST be >= 0, got {}",
                self.quantity
            )));
        }

        if !self.price_per_unit.is_finite() || self.price_per_unit < 0.0 {
            return Err(SalesError::Validation(format!(
                "price_per_unit MUST be a finite value >= 0, got {}",
                self.price_per_unit
            )));
        }

        if Date::parse(&self.date, format_description!("[year]-[month]-[day]")).is_err() {
            return Err(SalesError::Validation(format!(
                "date MUST be YYYY-MM-DD, got {:?}",
                self.date
            )));
        }

        Ok(())
    }
}

/// The fixed seed dataset, in insertion order.
#[must_use]
pub fn seed_sales() -> Vec<NewSale> {
    SEED_ROWS
        .iter()
        .map(|&(date, product_name, category, quantity, price_per_unit, region)| NewSale {
            date: date.to_string(),
            product_name: product_name.to_string(),
            category: category.to_string(),
            quantity,
            price_per_unit,
            region: region.to_string(),
        })
        .collect()
}

/// A sale as loaded from the store, with revenue computed by the read query.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    /// `None` when the stored text is not a recognizable date.
    pub date: Option<Date>,
    pub product_name: String,
    pub category: String,
    pub quantity: i64,
    pub price_per_unit: f64,
    pub region: String,
    pub revenue: f64,
}

/// Parses stored date text. Accepts `YYYY-MM-DD` and
/// `YYYY-MM-DD HH:MM:SS`; anything else yields `None`.
#[must_use]
pub fn parse_sale_date(raw: &str) -> Option<Date> {
    let trimmed = raw.trim();
    if let Ok(date) = Date::parse(trimmed, format_description!("[year]-[month]-[day]")) {
        return Some(date);
    }

    PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .ok()
    .map(PrimitiveDateTime::date)
}

/// Raw selection shapes accepted from the UI: a bare value or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SelectionInput {
    Single(String),
    Multiple(Vec<String>),
}

/// A normalized set of selected values for one filter dimension.
///
/// Deserializes from a string, an array of strings, or `null` (empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<SelectionInput>", into = "Vec<String>")]
pub struct Selection(BTreeSet<String>);

impl Selection {
    #[must_use]
    pub fn single(value: impl Into<String>) -> Self {
        Self(BTreeSet::from([value.into()]))
    }

    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Option<SelectionInput>> for Selection {
    fn from(input: Option<SelectionInput>) -> Self {
        match input {
            None => Self::default(),
            Some(SelectionInput::Single(value)) => Self::single(value),
            Some(SelectionInput::Multiple(values)) => values.into_iter().collect(),
        }
    }
}

impl From<Selection> for Vec<String> {
    fn from(selection: Selection) -> Self {
        selection.0.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The state of both dropdown filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub categories: Selection,
    pub regions: Selection,
}

impl FilterState {
    #[must_use]
    pub fn new(categories: Selection, regions: Selection) -> Self {
        Self { categories, regions }
    }

    /// A record passes when both its category and its region are selected.
    #[must_use]
    pub fn matches(&self, record: &SaleRecord) -> bool {
        self.categories.contains(&record.category) && self.regions.contains(&record.region)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRevenue {
    pub product_name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateQuantity {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Aggregates {
    pub matched_records: usize,
    /// Sorted by product name.
    pub product_revenue: Vec<ProductRevenue>,
    /// Sorted by date, ascending.
    pub date_quantity: Vec<DateQuantity>,
}

impl Aggregates {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.product_revenue.is_empty() && self.date_quantity.is_empty()
    }
}

pub fn filter_records<'a>(
    records: &'a [SaleRecord],
    filter: &'a FilterState,
) -> impl Iterator<Item = &'a SaleRecord> + 'a {
    records.iter().filter(move |record| filter.matches(record))
}

/// Filters `records` and sums revenue per product and quantity per date.
///
/// Records without a date still count toward product revenue but do not
/// form a date bucket.
#[must_use]
pub fn compute_aggregates(records: &[SaleRecord], filter: &FilterState) -> Aggregates {
    let mut matched_records = 0_usize;
    let mut undated = 0_usize;
    let mut revenue_by_product: BTreeMap<&str, f64> = BTreeMap::new();
    let mut quantity_by_date: BTreeMap<Date, i64> = BTreeMap::new();

    for record in filter_records(records, filter) {
        matched_records += 1;
        *revenue_by_product.entry(record.product_name.as_str()).or_insert(0.0) += record.revenue;

        match record.date {
            Some(date) => *quantity_by_date.entry(date).or_insert(0) += record.quantity,
            None => undated += 1,
        }
    }

    tracing::debug!(
        matched_records,
        undated,
        categories = filter.categories.len(),
        regions = filter.regions.len(),
        "computed aggregates"
    );

    Aggregates {
        matched_records,
        product_revenue: revenue_by_product
            .into_iter()
            .map(|(product_name, revenue)| ProductRevenue {
                product_name: product_name.to_string(),
                revenue,
            })
            .collect(),
        date_quantity: quantity_by_date
            .into_iter()
            .map(|(date, quantity)| DateQuantity { date, quantity })
            .collect(),
    }
}

/// The loaded sales, held read-only for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<SaleRecord>,
    categories: Vec<String>,
    regions: Vec<String>,
}

impl Dataset {
    #[must_use]
    pub fn new(records: Vec<SaleRecord>) -> Self {
        let categories = distinct_in_order(records.iter().map(|record| record.category.as_str()));
        let regions = distinct_in_order(records.iter().map(|record| record.region.as_str()));
        Self { records, categories, regions }
    }

    #[must_use]
    pub fn records(&self) -> &[SaleRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct categories in first-appearance order.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Distinct regions in first-appearance order.
    #[must_use]
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Every category and region selected.
    #[must_use]
    pub fn default_filter(&self) -> FilterState {
        FilterState::new(
            self.categories.iter().cloned().collect(),
            self.regions.iter().cloned().collect(),
        )
    }

    #[must_use]
    pub fn aggregates(&self, filter: &FilterState) -> Aggregates {
        compute_aggregates(&self.records, filter)
    }
}

fn distinct_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .filter(|value| seen.insert(*value))
        .map(ToString::to_string)
        .collect()
}
