//! Built-in sample datasets

use std::fmt;
use std::str::FromStr;

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dataset {
    #[default]
    Company,
    Store,
}

impl Dataset {
    pub const ALL: [Dataset; 2] = [Dataset::Company, Dataset::Store];

    pub fn name(self) -> &'static str {
        match self {
            Dataset::Company => "company",
            Dataset::Store => "store",
        }
    }

    /// Tables created by this dataset, in creation order.
    pub fn tables(self) -> &'static [&'static str] {
        match self {
            Dataset::Company => &["departments", "employees", "projects"],
            Dataset::Store => &["customers", "products", "orders"],
        }
    }

    /// DDL and rows as one batch.
    pub fn script(self) -> &'static str {
        match self {
            Dataset::Company => COMPANY,
            Dataset::Store => STORE,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dataset {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" | "default" => Ok(Dataset::Company),
            "store" | "ecommerce" => Ok(Dataset::Store),
            other => Err(EngineError::UnknownDataset(other.to_string())),
        }
    }
}

const COMPANY: &str = "
CREATE TABLE departments (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    location VARCHAR,
    budget INTEGER
);

INSERT INTO departments VALUES
    (1, 'Engineering', 'San Francisco', 500000),
    (2, 'Sales', 'New York', 300000),
    (3, 'Marketing', 'Chicago', 200000),
    (4, 'Human Resources', 'Austin', 150000),
    (5, 'Finance', 'Boston', 250000),
    (6, 'Research', 'Seattle', 400000),
    (7, 'Legal', 'Denver', 180000);

CREATE TABLE employees (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    dept_id INTEGER,
    salary INTEGER,
    hire_date DATE,
    manager_id INTEGER
);

INSERT INTO employees VALUES
    (1, 'Alice Johnson', 1, 120000, DATE '2019-03-15', NULL),
    (2, 'Bob Smith', 1, 95000, DATE '2020-07-01', 1),
    (3, 'Carol White', 1, 105000, DATE '2018-11-20', 1),
    (4, 'David Brown', 2, 70000, DATE '2021-02-10', NULL),
    (5, 'Emma Davis', 2, 65000, DATE '2021-06-25', 4),
    (6, 'Frank Miller', 3, 60000, DATE '2019-09-05', NULL),
    (7, 'Grace Wilson', 3, 58000, DATE '2022-01-17', 6),
    (8, 'Henry Taylor', 4, 55000, DATE '2020-04-12', NULL),
    (9, 'Ivy Anderson', 4, 52000, DATE '2023-03-01', 8),
    (10, 'Jack Thomas', 5, 85000, DATE '2017-08-30', NULL),
    (11, 'Karen Jackson', 5, 78000, DATE '2019-12-09', 10),
    (12, 'Liam Harris', 2, 72000, DATE '2022-05-19', 4),
    (13, 'Mia Martin', 1, 98000, DATE '2021-10-04', 1),
    (14, 'Noah Garcia', 6, 110000, DATE '2016-05-23', NULL),
    (15, 'Olivia Moore', NULL, 50000, DATE '2024-01-08', NULL);

CREATE TABLE projects (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    dept_id INTEGER,
    lead_id INTEGER,
    budget INTEGER
);

INSERT INTO projects VALUES
    (1, 'Platform Rewrite', 1, 1, 250000),
    (2, 'Mobile App', 1, 3, 150000),
    (3, 'Q3 Campaign', 3, 6, 60000),
    (4, 'Enterprise Deals', 2, 4, 40000),
    (5, 'Hiring Pipeline', 4, 8, 20000),
    (6, 'Audit Automation', 5, 10, 35000),
    (7, 'Search Research', 6, 14, 120000),
    (8, 'Office Move', NULL, NULL, 15000);
";

const STORE: &str = "
CREATE TABLE customers (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    city VARCHAR,
    joined DATE
);

INSERT INTO customers VALUES
    (1, 'Ana Lopez', 'Madrid', DATE '2022-01-10'),
    (2, 'Ben Carter', 'London', DATE '2022-03-22'),
    (3, 'Chen Wei', 'Shanghai', DATE '2022-06-05'),
    (4, 'Dana Kim', 'Seoul', DATE '2023-02-14'),
    (5, 'Eli Novak', 'Prague', DATE '2023-08-30'),
    (6, 'Fatima Zahra', 'Casablanca', DATE '2024-01-03');

CREATE TABLE products (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    category VARCHAR,
    price DOUBLE,
    stock INTEGER
);

INSERT INTO products VALUES
    (1, 'Laptop', 'Electronics', 1200.0, 15),
    (2, 'Headphones', 'Electronics', 150.0, 80),
    (3, 'Coffee Maker', 'Kitchen', 85.5, 40),
    (4, 'Desk Chair', 'Furniture', 230.0, 25),
    (5, 'Notebook', 'Stationery', 4.25, 500),
    (6, 'Standing Desk', 'Furniture', 540.0, 0);

CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER,
    product_id INTEGER,
    quantity INTEGER,
    order_date DATE
);

INSERT INTO orders VALUES
    (1, 1, 1, 1, DATE '2024-01-15'),
    (2, 1, 5, 10, DATE '2024-01-15'),
    (3, 2, 2, 2, DATE '2024-02-02'),
    (4, 3, 3, 1, DATE '2024-02-20'),
    (5, 3, 5, 3, DATE '2024-03-01'),
    (6, 4, 4, 2, DATE '2024-03-11'),
    (7, 2, 1, 1, DATE '2024-04-05'),
    (8, 5, 2, 1, DATE '2024-04-18'),
    (9, NULL, 3, 1, DATE '2024-05-02');
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dataset_names() {
        assert_eq!("company".parse::<Dataset>().unwrap(), Dataset::Company);
        assert_eq!(" Store ".parse::<Dataset>().unwrap(), Dataset::Store);
        assert!(matches!(
            "nope".parse::<Dataset>(),
            Err(EngineError::UnknownDataset(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_scripts_create_every_listed_table() {
        for dataset in Dataset::ALL {
            for table in dataset.tables() {
                assert!(dataset.script().contains(&format!("CREATE TABLE {} (", table)));
            }
        }
    }
}
