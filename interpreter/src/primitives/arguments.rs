use std::collections::BTreeMap;

use blocks::Value;

/// Field values handed to a primitive, with lenient coercions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Arguments { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric value of `name`, 0 when missing.
    pub fn number(&self, name: &str) -> f64 {
        self.values.get(name).map(Value::as_number).unwrap_or(0.0)
    }

    /// Text of `name`, empty when missing.
    pub fn text(&self, name: &str) -> String {
        self.values.get(name).map(Value::as_text).unwrap_or_default()
    }

    /// Truthiness of `name`, false when missing.
    pub fn boolean(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(Value::is_truthy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Arguments::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arguments_use_neutral_defaults() {
        let args = Arguments::default();
        assert_eq!(args.number("TIMES"), 0.0);
        assert_eq!(args.text("MESSAGE"), "");
        assert!(!args.boolean("CONDITION"));
    }

    #[test]
    fn values_are_coerced() {
        let args: Arguments = [
            ("TIMES".to_string(), Value::from("4")),
            ("MESSAGE".to_string(), Value::Number(2.0)),
            ("CONDITION".to_string(), Value::from("false")),
        ]
        .into_iter()
        .collect();
        assert_eq!(args.number("TIMES"), 4.0);
        assert_eq!(args.text("MESSAGE"), "2");
        assert!(!args.boolean("CONDITION"));
    }
}
