use pest::Parser;
use sqlstep_ast::parser::{Rule, SqlParser};
use sqlstep_ast::QueryDescriptor;

fn main() {
    let input = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "SELECT e.name FROM employees e JOIN departments d ON e.dept_id = d.id".to_string());

    match SqlParser::parse(Rule::statement, &input) {
        Ok(pairs) => {
            for pair in pairs {
                print_pair(&pair, 0);
            }
        }
        Err(e) => println!("Error: {:?}", e),
    }

    let descriptor = QueryDescriptor::extract(&input);
    match serde_json::to_string_pretty(&descriptor) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("Error: {}", e),
    }
}

fn print_pair(pair: &pest::iterators::Pair<Rule>, indent: usize) {
    let indent_str = "  ".repeat(indent);
    println!("{}Rule::{:?} = {:?}", indent_str, pair.as_rule(), pair.as_str());
    for inner in pair.clone().into_inner() {
        print_pair(&inner, indent + 1);
    }
}
