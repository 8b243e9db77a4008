// Usage: exprprobe check '1 + 1' --type number
//        exprprobe suite tests/suites

fn main() {
    exprprobe::cli::run();
}
