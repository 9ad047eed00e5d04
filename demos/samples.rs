//! Prints the small standalone samples

use rust_vtasks::samples::{compare_rows, dedup_people, greet, Gender, Person};

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("{}", greet("Matt"));

    println!("\n--- Row comparison ---");
    println!(
        "{}",
        compare_rows("000,111,222,333,444", "000,111,222,333,444", ",")
    );
    println!(
        "{}",
        compare_rows("000,111,222,333,444", "000,111,999,333,445", ",")
    );

    println!("\n--- Record keys ---");
    let people = dedup_people((0..3).map(|_| {
        (
            Person::new("Matt Long", 23, Gender::Man),
            "RealHandsome!".to_string(),
        )
    }));
    println!("{:?}", people);
}
