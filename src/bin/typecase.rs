// Typecase command-line runner: discovers scenario documents and checks them.
// Usage: typecase [OPTIONS] [PATHS]...

fn main() {
    typecase::cli::run();
}
