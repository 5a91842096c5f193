use std::sync::Arc;

use heapstore::tuple::{DataType, Schema, TupleBuilder};
use heapstore::{Database, StorageConfig};

fn main() {
    println!("Heapstore - heap files, a buffer pool and two-phase locking");
    println!("============================================================\n");

    let db_path = "demo_accounts.dat";
    std::fs::remove_file(db_path).ok();

    let config = StorageConfig::new().with_pool_size(8);
    let db = Database::open(config).expect("Failed to open database");

    let schema = Schema::builder()
        .column("id", DataType::Integer)
        .column("owner", DataType::Char(16))
        .column("balance", DataType::BigInt)
        .build_arc();
    let table = db
        .create_table("accounts", db_path, Arc::clone(&schema))
        .expect("Failed to create table");
    println!("Created table 'accounts' in {}", db_path);

    // Committed inserts
    let tx = db.begin();
    for (id, owner, balance) in [(1, "ada", 120i64), (2, "grace", 75), (3, "linus", 300)] {
        let tuple = TupleBuilder::new(Arc::clone(&schema))
            .value(id)
            .value(owner)
            .value(balance)
            .build()
            .expect("Failed to build tuple");
        let rid = db.insert(&tx, table, tuple).expect("Failed to insert tuple");
        println!("Inserted {} at {}", owner, rid);
    }
    tx.commit().expect("Failed to commit");
    println!("Committed\n");

    // Aborted insert leaves no trace
    let tx = db.begin();
    let tuple = TupleBuilder::new(Arc::clone(&schema))
        .value(4)
        .value("mallory")
        .value(1_000_000i64)
        .build()
        .expect("Failed to build tuple");
    db.insert(&tx, table, tuple).expect("Failed to insert tuple");
    tx.abort().expect("Failed to abort");
    println!("Inserted mallory, then aborted\n");

    // Scan what is on disk
    let tx = db.begin();
    println!("Scanning 'accounts':");
    for tuple in db.scan(&tx, table).expect("Failed to scan") {
        let tuple = tuple.expect("Failed to read tuple");
        let values: Vec<String> = tuple.values().iter().map(|v| v.to_string()).collect();
        println!("  - {}", values.join(", "));
    }
    tx.commit().expect("Failed to commit");

    println!(
        "\nBuffer pool holds {} of {} pages",
        db.buffer_pool().cached_page_count(),
        db.buffer_pool().pool_size()
    );

    // Clean up
    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
