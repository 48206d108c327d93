fn main() {
    std::process::exit(sandworm::cli::run());
}
