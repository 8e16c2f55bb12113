use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "p4.pest"]
pub struct P4Parser;
