//! The interactive shell: read a line, evaluate it, print the result,
//! repeat until end-of-input. One malformed input never ends the session;
//! errors are printed and the loop continues. The only fatal condition is
//! a panic out of the core (native resource exhaustion), which the guard
//! below reports before exiting nonzero.

use replisp::value::Value;
use replisp::{Environment, create_global_env, evaluate, print};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let result = panic::catch_unwind(run_repl);

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("Welcome to the Lisp REPL.");
    println!("Enter an expression, or press Ctrl-D to exit. :help lists commands.");
    println!();

    let mut editor = DefaultEditor::new().expect("could not initialize line editing");
    let env = create_global_env();

    loop {
        match editor.readline("user> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = editor.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match evaluate(line, &env) {
                    // A line of pure whitespace/comments has no result.
                    Ok(None) => {}
                    Ok(Some(value)) => println!("{}", print(&value)),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("A small Lisp:");
    println!("  Atoms:         42, 2.5, \"text\", #t, #f, ()");
    println!("  Arithmetic:    +, -, *, /  (integers and floats)");
    println!("  Comparison:    <, >, <=, >=, =, eq?");
    println!("  Lists:         cons, car, cdr, list, null?, pair?");
    println!("  Special forms: quote ('x), if, define, lambda, and, or");
    println!("  Output:        (display x)");
    println!();
    println!("Commands:");
    println!("  :help  - this message");
    println!("  :env   - list the current bindings");
    println!("  :quit  - exit (also :exit or Ctrl-D)");
    println!();
    println!("Examples:");
    println!("  (define make-adder (lambda (n) (lambda (x) (+ x n))))");
    println!("  ((make-adder 5) 3)");
    println!("  (car '(a b c))");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    // Separate primitives from user definitions for readability.
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Builtin(_) => builtins.push(name),
            other => user_defined.push((name, other)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        let mut column = 0;
        for name in builtins {
            print!("  {name:<10}");
            column += 1;
            if column % 6 == 0 {
                println!();
            }
        }
        if column % 6 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User definitions ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {}", print(&value));
        }
    }
}
