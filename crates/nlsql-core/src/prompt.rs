/// Prompt sent to the model for question→SQL translation.
///
/// The schema lines name the demo tables directly; the service-side allow-list is the
/// enforcement boundary, the prompt only steers the model toward it.
pub fn sql_prompt(question: &str, max_limit: u64) -> String {
    format!(
        "You convert a user question to a single SELECT SQL statement for PostgreSQL.\n\
         \n\
         Rules:\n\
         - Use only tables: customers(id,name,email), products(id,name,price), orders(id,customer_id,product_id,quantity,order_date)\n\
         - Output SQL ONLY, no commentary or code fences\n\
         - One statement only\n\
         - NO DDL/DML (no INSERT/UPDATE/DELETE/CREATE/ALTER/DROP/TRUNCATE)\n\
         - Must include LIMIT <= {max_limit}\n\
         - Use qualified column names when joins are present\n\
         \n\
         Question: {question}\n\
         SQL:"
    )
}
