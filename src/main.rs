use std::process;

fn main() {
    if let Err(err) = pvm_bridge::run() {
        eprintln!("Error: {err:?}");
        process::exit(1);
    }
}
