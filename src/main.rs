use std::io::{self, Read};

fn main() {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .expect("Failed to read stdin");
    let (root, errors) = treemark::parse(&input);
    let json = serde_json::to_string_pretty(&root).expect("Failed to serialize tree");
    println!("{}", json);
    for error in errors {
        eprintln!("error at {}..{}: {}", error.range.start, error.range.end, error.message);
    }
}
